//! CLI argument parsing

use clap::{Parser, Subcommand};

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "qflasher")]
#[command(author, version, about = "QSPI flash arbitration simulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Arbiter parameters (e.g. "queue=4,fast_read=raw,cal_addr=0x1000")
    #[arg(long, global = true, default_value = "")]
    pub params: String,

    /// Emulated flash size in bytes
    #[arg(long, global = true, default_value = "0x100000", value_parser = parse_hex_u32)]
    pub size: u32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Hammer the arbiter from several threads and verify every read-back
    Stress {
        /// Number of client threads
        #[arg(short, long, default_value_t = 4)]
        threads: usize,

        /// Erase/write/read rounds per thread
        #[arg(short, long, default_value_t = 100)]
        iterations: usize,
    },

    /// Open a low-level window and compare raw and nibble-swapped fast reads
    Lowlevel {
        /// Start address (hex or decimal)
        #[arg(short, long, default_value = "0x1000", value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to compare
        #[arg(short, long, default_value_t = 4096)]
        length: usize,
    },

    /// Read a range through the gateway and print it as hex
    Dump {
        /// Start address (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to print
        #[arg(default_value_t = 256)]
        length: usize,
    },
}
