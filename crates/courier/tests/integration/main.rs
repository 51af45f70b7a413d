mod utils;

mod queue;
mod transport;
