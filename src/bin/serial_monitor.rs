//! Interactive serial monitor.
//!
//! ```bash
//! serial_monitor --port /dev/ttyACM0 --baudrate 115200 --eol CRLF
//! ```

use barrera_lab_drivers::logging::{init_tracing, LogFormat};
use barrera_lab_drivers::monitor::{self, MonitorOptions};
use clap::Parser;

#[tokio::main]
async fn main() {
    init_tracing("warn", LogFormat::Pretty);
    let options = MonitorOptions::parse();

    if let Err(e) = monitor::run(options).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
