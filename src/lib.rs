pub mod demo;
pub mod sim;
pub mod trace;

#[cfg(test)]
mod test;
