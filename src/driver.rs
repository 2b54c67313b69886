//! Instrument driver seam.
//!
//! The pollers only need "read a block of holding registers from a unit on
//! this line, or fail" — [`RegisterBus`] is that capability. The production
//! binding speaks Modbus RTU over a serial line; protocol framing and CRC
//! live entirely in the driver crate. Every call carries a bounded timeout
//! so a dead instrument can only cost one read slot, never the whole cycle.

use std::time::Duration;

use tokio::time::timeout;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::debug;

use crate::config::SerialConfig;
use crate::error::{AppError, Result};

/// Register-level access to one serial instrument bus.
#[allow(async_fn_in_trait)]
pub trait RegisterBus {
    /// Read `count` holding registers starting at `addr` from unit `unit`.
    async fn read_registers(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<u16>>;

    /// Write one holding register on unit `unit`.
    async fn write_register(&mut self, unit: u8, addr: u16, value: u16) -> Result<()>;
}

/// Modbus RTU over a serial port, shared by every unit on the line.
pub struct SerialRtuBus {
    ctx: Context,
    timeout: Duration,
    port: String,
}

impl SerialRtuBus {
    /// Open the serial port and attach a Modbus RTU client to it.
    pub fn open(cfg: &SerialConfig) -> Result<Self> {
        let builder = tokio_serial::new(&cfg.port, cfg.baud)
            .parity(parse_parity(&cfg.parity)?)
            .stop_bits(parse_stop_bits(cfg.stop_bits)?)
            .data_bits(parse_data_bits(cfg.data_bits)?);
        let stream = SerialStream::open(&builder)
            .map_err(|e| AppError::Bus(format!("open {}: {e}", cfg.port)))?;
        debug!(port = %cfg.port, baud = cfg.baud, "serial port attached");
        Ok(Self {
            ctx: rtu::attach(stream),
            timeout: cfg.timeout(),
            port: cfg.port.clone(),
        })
    }
}

impl RegisterBus for SerialRtuBus {
    async fn read_registers(&mut self, unit: u8, addr: u16, count: u16) -> Result<Vec<u16>> {
        self.ctx.set_slave(Slave(unit));
        match timeout(self.timeout, self.ctx.read_holding_registers(addr, count)).await {
            Err(_) => Err(AppError::Bus(format!(
                "{} unit {unit}: read {addr:#06x} timed out",
                self.port
            ))),
            Ok(Err(e)) => Err(AppError::Bus(format!(
                "{} unit {unit}: read {addr:#06x}: {e}",
                self.port
            ))),
            Ok(Ok(Err(exc))) => Err(AppError::Bus(format!(
                "{} unit {unit}: read {addr:#06x}: device exception {exc}",
                self.port
            ))),
            Ok(Ok(Ok(words))) => Ok(words),
        }
    }

    async fn write_register(&mut self, unit: u8, addr: u16, value: u16) -> Result<()> {
        self.ctx.set_slave(Slave(unit));
        match timeout(self.timeout, self.ctx.write_single_register(addr, value)).await {
            Err(_) => Err(AppError::Bus(format!(
                "{} unit {unit}: write {addr:#06x} timed out",
                self.port
            ))),
            Ok(Err(e)) => Err(AppError::Bus(format!(
                "{} unit {unit}: write {addr:#06x}: {e}",
                self.port
            ))),
            Ok(Ok(Err(exc))) => Err(AppError::Bus(format!(
                "{} unit {unit}: write {addr:#06x}: device exception {exc}",
                self.port
            ))),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }
}

fn parse_parity(s: &str) -> Result<Parity> {
    match s {
        "N" | "n" => Ok(Parity::None),
        "E" | "e" => Ok(Parity::Even),
        "O" | "o" => Ok(Parity::Odd),
        other => Err(AppError::Config(format!("unsupported parity {other:?}"))),
    }
}

fn parse_stop_bits(n: u8) -> Result<StopBits> {
    match n {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(AppError::Config(format!("unsupported stop bits {other}"))),
    }
}

fn parse_data_bits(n: u8) -> Result<DataBits> {
    match n {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(AppError::Config(format!("unsupported data bits {other}"))),
    }
}
