// focuser_simulator: a stand-in for the FPGA focuser board, in-process or over TCP

pub mod board;
pub mod server;

pub use board::{BacklashRegisters, SimulatedBoard};
