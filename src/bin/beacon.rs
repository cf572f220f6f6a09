//! 信标场景仿真
//!
//! 环形拓扑上的周期信标 + 邻居超时检测，可选节点失效。

use clap::Parser;
use evsim_rs::demo::{BeaconOpts, BeaconWorld, ScenarioSpec, install};
use evsim_rs::sim::{Delay, SimTime, Simulator};
use evsim_rs::trace::DispatchLogger;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Debug, Parser)]
#[command(name = "beacon", about = "信标场景仿真：周期信标 + 邻居失联检测")]
struct Args {
    /// 场景文件（JSON），给出时覆盖其余场景参数
    #[arg(long)]
    scenario: Option<PathBuf>,
    #[arg(long, default_value_t = 4)]
    nodes: u32,
    /// 信标周期（微秒）
    #[arg(long, default_value_t = 100)]
    period_us: i64,
    /// 邻居超时（微秒）
    #[arg(long, default_value_t = 250)]
    timeout_us: i64,
    /// 单向链路时延（微秒）
    #[arg(long, default_value_t = 2)]
    link_delay_us: i64,
    /// 让某个节点失效
    #[arg(long)]
    fail_node: Option<u32>,
    /// 节点失效时间（毫秒）
    #[arg(long, default_value_t = 1)]
    fail_at_ms: u64,
    /// 仿真运行到多少毫秒
    #[arg(long, default_value_t = 10)]
    until_ms: u64,
    /// 把每次事件派发写成 JSON 数组
    #[arg(long)]
    trace_json: Option<PathBuf>,
}

fn opts_from_args(args: &Args) -> BeaconOpts {
    if let Some(path) = &args.scenario {
        let raw = fs::read_to_string(path).expect("read scenario file");
        let spec: ScenarioSpec = serde_json::from_str(&raw).expect("parse scenario file");
        return match BeaconOpts::try_from(&spec) {
            Ok(opts) => opts,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(2);
            }
        };
    }
    BeaconOpts {
        nodes: args.nodes,
        period: Delay::from_micros(args.period_us),
        timeout: Delay::from_micros(args.timeout_us),
        link_delay: Delay::from_micros(args.link_delay_us),
        until: SimTime::from_millis(args.until_ms),
        failures: args
            .fail_node
            .map(|n| vec![(n, SimTime::from_millis(args.fail_at_ms))])
            .unwrap_or_default(),
    }
}

fn main() {
    // 初始化 tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    let opts = opts_from_args(&args);

    let mut sim = Simulator::new();
    let mut world = BeaconWorld::default();
    if args.trace_json.is_some() {
        world.trace = Some(DispatchLogger::default());
    }

    if let Err(e) = install(&mut sim, &mut world, &opts) {
        eprintln!("error: {e}");
        process::exit(2);
    }

    let summary = match sim.run(&mut world) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("simulation failed @ {}: {e}", sim.now());
            process::exit(1);
        }
    };

    for lost in &world.lost {
        println!(
            "neighbor_lost node={} neighbor={} at_ns={}",
            lost.node, lost.neighbor, lost.at_ns
        );
    }
    println!(
        "done @ {:?}, events={}, cancelled={}, sent={}, received={}, lost={}",
        summary.final_time,
        summary.executed,
        sim.cancelled_count(),
        world.total_sent(),
        world.total_received(),
        world.lost.len()
    );

    if let Some(path) = args.trace_json {
        let trace = world.trace.take().unwrap_or_default();
        let json = trace.to_json().expect("serialize trace");
        fs::write(&path, json).expect("write trace json");
        eprintln!("wrote {} dispatch records to {}", trace.records.len(), path.display());
    }

    if let Err(e) = sim.destroy(&mut world) {
        eprintln!("teardown failed: {e}");
        process::exit(1);
    }
    println!("teardown outstanding_timeouts={}", world.torn_down.unwrap_or(0));
}
