use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use modbus_link::{
    setup_logging, LinkConfig, ModbusClient, ModbusError, RegisterBank, TcpServer,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the config file (config/default.yaml + env otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump default config and exit
    #[arg(long = "dump-default-config")]
    dump_default: bool,

    /// Use the serial (RTU) transport from the config instead of TCP
    #[arg(long)]
    rtu: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Read holding registers (FC 03)
    ReadHolding {
        #[arg(long, default_value_t = 1)]
        unit: u8,
        start: u16,
        #[arg(default_value_t = 1)]
        count: u16,
        /// Decode register pairs as IEEE-754 floats, low word first
        #[arg(long)]
        float: bool,
    },
    /// Read input registers (FC 04)
    ReadInput {
        #[arg(long, default_value_t = 1)]
        unit: u8,
        start: u16,
        #[arg(default_value_t = 1)]
        count: u16,
    },
    /// Read coils (FC 01)
    ReadCoils {
        #[arg(long, default_value_t = 1)]
        unit: u8,
        start: u16,
        #[arg(default_value_t = 1)]
        count: u16,
    },
    /// Write one holding register (FC 06)
    WriteRegister {
        #[arg(long, default_value_t = 1)]
        unit: u8,
        address: u16,
        value: u16,
    },
    /// Write one coil (FC 05)
    WriteCoil {
        #[arg(long, default_value_t = 1)]
        unit: u8,
        address: u16,
        value: bool,
    },
    /// Re-read a register window every poll period
    Watch {
        #[arg(long, default_value_t = 1)]
        unit: u8,
        start: u16,
        #[arg(default_value_t = 1)]
        count: u16,
    },
    /// Host a Modbus TCP server backed by an in-memory register bank
    Serve,
}

async fn connect(config: &LinkConfig, rtu: bool) -> Result<ModbusClient, ModbusError> {
    if rtu {
        info!("Using RTU transport on {}", config.rtu.serial_port_info());
        ModbusClient::rtu(&config.rtu)
    } else {
        info!("Using TCP transport to {}:{}", config.tcp.host, config.tcp.port);
        ModbusClient::tcp(&config.tcp).await
    }
}

fn print_json(value: impl serde::Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.common.dump_default {
        println!("{}", serde_yaml::to_string(&LinkConfig::default())?);
        return Ok(());
    }

    let config = match &cli.common.config {
        Some(path) => LinkConfig::from_file(path.clone())?,
        None => LinkConfig::new()?,
    };

    let _log_guard = setup_logging(&config.logging)?;

    let Some(command) = cli.command else {
        eprintln!("No command given; try --help");
        std::process::exit(2);
    };

    match command {
        Command::ReadHolding {
            unit,
            start,
            count,
            float,
        } => {
            let client = connect(&config, cli.common.rtu).await?;
            if float {
                let values = client
                    .read_holding_registers_float(unit, start, count)
                    .await?;
                print_json(values)?;
            } else {
                let values = client.read_holding_registers(unit, start, count).await?;
                print_json(values)?;
            }
            client.disconnect().await?;
        }
        Command::ReadInput { unit, start, count } => {
            let client = connect(&config, cli.common.rtu).await?;
            let values = client.read_input_registers(unit, start, count).await?;
            print_json(values)?;
            client.disconnect().await?;
        }
        Command::ReadCoils { unit, start, count } => {
            let client = connect(&config, cli.common.rtu).await?;
            let values = client.read_coils(unit, start, count).await?;
            print_json(values)?;
            client.disconnect().await?;
        }
        Command::WriteRegister {
            unit,
            address,
            value,
        } => {
            let client = connect(&config, cli.common.rtu).await?;
            client.write_holding_register(unit, address, value).await?;
            info!("Wrote {} to register {}", value, address);
            client.disconnect().await?;
        }
        Command::WriteCoil {
            unit,
            address,
            value,
        } => {
            let client = connect(&config, cli.common.rtu).await?;
            client.write_coil(unit, address, value).await?;
            info!("Wrote {} to coil {}", value, address);
            client.disconnect().await?;
        }
        Command::Watch { unit, start, count } => {
            let client = Arc::new(connect(&config, cli.common.rtu).await?);
            info!(
                "Watching {} registers at {} every {:?} (ctrl-c to stop)",
                count, start, config.poll.period
            );
            loop {
                let started = Instant::now();
                match client.read_holding_registers(unit, start, count).await {
                    Ok(values) => print_json(values)?,
                    Err(e) => warn!("Poll failed: {}", e),
                }

                let wait = config.poll.period.saturating_sub(started.elapsed());
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            client.disconnect().await?;
        }
        Command::Serve => {
            let bank = RegisterBank::new();
            let server = Arc::new(TcpServer::new(config.server.clone(), bank.handlers()));

            let running = Arc::clone(&server);
            let task = tokio::spawn(async move { running.run().await });

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            server.stop();
            task.await??;
        }
    }

    Ok(())
}
