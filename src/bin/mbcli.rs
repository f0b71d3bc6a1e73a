//! Modbus TCP command line master
//!
//! Reads and writes coils and holding registers of a single PLC:
//!
//! ```text
//! mbcli --ip 192.168.1.10 --cr 100:8 --rw 40:1234
//! coil=00100 status=true
//! ...
//! register=00040 newValue=001234
//! ```
//!
//! Exit codes: 0 ok, 1 unparsable command line, 2 rejected option values,
//! 3 execution failure.

use anyhow::{anyhow, bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use modbus_tcp_master::utils::{format, logging};
use modbus_tcp_master::{
    CallbackLogger, ConnectionConfig, LogLevel, LoggingMode, ModbusClient, ModbusTcpClient, UnitId,
};

const EXIT_OK: u8 = 0;
const EXIT_PARSE: u8 = 1;
const EXIT_OPTIONS: u8 = 2;
const EXIT_EXECUTION: u8 = 3;

/// Modbus TCP master: read and write coils and holding registers
#[derive(Parser, Debug)]
#[command(name = "mbcli", version, about)]
struct Cli {
    /// IP address or DNS name of the PLC
    #[arg(long, value_name = "IP_ADDRESS")]
    ip: Option<String>,

    /// TCP port number
    #[arg(short, long, value_name = "PORT_NUMBER", default_value = "502")]
    port: String,

    /// Unit identifier sent with every request
    #[arg(short, long, value_name = "UNIT_ID", default_value = "0")]
    unit: String,

    /// Read coil status; with a number, read that many coils
    #[arg(long = "cr", allow_hyphen_values = true, value_name = "COIL_ADDRESS[:NUMBER]")]
    read_coils: Option<String>,

    /// Set coil
    #[arg(long = "cs", allow_hyphen_values = true, value_name = "COIL_ADDRESS")]
    set_coil: Option<String>,

    /// Toggle coil
    #[arg(long = "ct", allow_hyphen_values = true, value_name = "COIL_ADDRESS")]
    toggle_coil: Option<String>,

    /// Unset coil
    #[arg(long = "cu", allow_hyphen_values = true, value_name = "COIL_ADDRESS")]
    unset_coil: Option<String>,

    /// Read register value; with a number, read that many registers
    #[arg(long = "rr", allow_hyphen_values = true, value_name = "REG_ADDRESS[:NUMBER]")]
    read_registers: Option<String>,

    /// Write a value (-32768..65535) to a holding register
    #[arg(long = "rw", allow_hyphen_values = true, value_name = "REG_ADDRESS:VALUE")]
    write_register: Option<String>,

    /// Display results only
    #[arg(short, long)]
    silent: bool,

    /// Display debugging information
    #[arg(short, long)]
    debug: bool,

    /// JSON or YAML file with connection tunables
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Validated work to perform
#[derive(Debug, Default, PartialEq)]
struct Plan {
    config: Option<ConnectionConfig>,
    unit_id: UnitId,
    read_coils: Option<(i32, i32)>,
    set_coil: Option<i32>,
    toggle_coil: Option<i32>,
    unset_coil: Option<i32>,
    read_registers: Option<(i32, i32)>,
    write_register: Option<(i32, i32)>,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    ExitCode::from(run(&args))
}

fn run(args: &[String]) -> u8 {
    let silent = args.iter().any(|a| a == "-s" || a == "--silent");
    let say = |message: &str| {
        if !silent {
            println!("{}", message);
        }
    };

    say(&format!("Modbus CLI {}. Use --help for help", modbus_tcp_master::VERSION));

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return EXIT_OK;
        }
        Err(e) => {
            if !silent {
                let _ = e.print();
            }
            return EXIT_PARSE;
        }
    };

    let plan = match build_plan(&cli) {
        Ok(plan) => plan,
        Err(e) => {
            say(&format!("{:#}", e));
            return EXIT_OPTIONS;
        }
    };

    let (logger, filter) = if cli.debug {
        let mut logger = CallbackLogger::console(LogLevel::Debug);
        logger.set_mode(LoggingMode::Both);
        (logger, "debug")
    } else if silent {
        (CallbackLogger::disabled(), "off")
    } else {
        (CallbackLogger::disabled(), "warn")
    };
    logging::init_tracing(filter);

    let mut client = ModbusTcpClient::with_logger(logger);
    match execute(&mut client, &plan) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            say(&format!("{:#}", e));
            if client.is_connected() {
                let _ = client.disconnect();
            }
            EXIT_EXECUTION
        }
    }
}

fn build_plan(cli: &Cli) -> Result<Plan> {
    let host = match cli.ip.as_deref() {
        Some(host) if !host.is_empty() => host,
        Some(_) => bail!("syntax error: missed IP address or DNS name of PLC after --ip option"),
        None => bail!("syntax error: missing required IP address or DNS name of PLC. Use --ip option"),
    };

    let port: i64 = parse_number(&cli.port, "port number", "-p")?;
    if port <= 0 || port > u16::MAX as i64 {
        bail!("syntax error: number after -p option must be between 1 and 65535");
    }
    let unit_id: i64 = parse_number(&cli.unit, "unit id", "-u")?;
    let unit_id = UnitId::try_from(unit_id)
        .map_err(|_| anyhow!("syntax error: unit id after -u option must be between 0 and 255"))?;

    let config = match &cli.config {
        Some(path) => {
            let loaded = ConnectionConfig::from_file(path)
                .with_context(|| format!("config error: cannot load {}", path.display()))?;
            ConnectionConfig { host: host.to_string(), port: port as u16, ..loaded }
        }
        None => ConnectionConfig::new(host, port as u16),
    };

    let plan = Plan {
        config: Some(config),
        unit_id,
        read_coils: cli.read_coils.as_deref().map(|v| address_count(v, "coil", "--cr")).transpose()?,
        set_coil: cli.set_coil.as_deref().map(|v| address(v, "coil", "--cs")).transpose()?,
        toggle_coil: cli.toggle_coil.as_deref().map(|v| address(v, "coil", "--ct")).transpose()?,
        unset_coil: cli.unset_coil.as_deref().map(|v| address(v, "coil", "--cu")).transpose()?,
        read_registers: cli
            .read_registers
            .as_deref()
            .map(|v| address_count(v, "register", "--rr"))
            .transpose()?,
        write_register: cli.write_register.as_deref().map(address_value).transpose()?,
    };

    if plan.read_coils.is_none()
        && plan.set_coil.is_none()
        && plan.toggle_coil.is_none()
        && plan.unset_coil.is_none()
        && plan.read_registers.is_none()
        && plan.write_register.is_none()
    {
        bail!("usage error: at least one of --help, --cr, --cs, --ct, --cu, --rr or --rw must be provided");
    }
    Ok(plan)
}

fn parse_number(value: &str, what: &str, option: &str) -> Result<i64> {
    value.trim().parse().map_err(|_| {
        anyhow!(
            "syntax error: {} (entered:{}) provided with {} option is not a valid number",
            what,
            value,
            option
        )
    })
}

fn non_negative(value: &str, what: &str, option: &str) -> Result<i32> {
    let number = parse_number(value, what, option)?;
    if number < 0 {
        bail!("syntax error: {} (entered:{}) provided with {} option must be a positive number", what, value, option);
    }
    i32::try_from(number).map_err(|_| anyhow!("syntax error: {} (entered:{}) provided with {} option is too large", what, value, option))
}

fn address(value: &str, kind: &str, option: &str) -> Result<i32> {
    if value.is_empty() {
        bail!("syntax error: {} address must be provided with {} option", kind, option);
    }
    non_negative(value, &format!("{} address", kind), option)
}

/// `address[:count]`, count defaults to 1
fn address_count(value: &str, kind: &str, option: &str) -> Result<(i32, i32)> {
    let (first, second) = match value.split_once(':') {
        Some((first, second)) => (first, second),
        None => (value, ""),
    };
    let start = address(first, kind, option)?;
    let count = if second.is_empty() {
        1
    } else {
        non_negative(second, &format!("number of {}s", kind), option)?
    };
    Ok((start, count))
}

/// `address:value`
fn address_value(value: &str) -> Result<(i32, i32)> {
    let (first, second) = value.split_once(':').unwrap_or((value, ""));
    let register = address(first, "register", "--rw")?;
    if second.is_empty() {
        bail!("syntax error: register value must be specified with --rw option");
    }
    let value = parse_number(second, "register value", "--rw")?;
    let value = i32::try_from(value)
        .map_err(|_| anyhow!("syntax error: register value (entered:{}) is out of range", second))?;
    Ok((register, value))
}

fn execute(client: &mut ModbusTcpClient, plan: &Plan) -> Result<()> {
    let unit = plan.unit_id;
    let config = plan
        .config
        .clone()
        .ok_or_else(|| anyhow!("setup error: no connection parameters"))?;

    client.setup(config).context("setup error: check parameters")?;
    client.connect().context("connection error: check parameters")?;

    if let Some((start, count)) = plan.read_coils {
        let coils = client
            .read_coils(start, count, unit)
            .context("read error: cannot read coils status")?;
        for (offset, status) in coils.iter().enumerate() {
            println!("{}", format::coil_status(start + offset as i32, *status));
        }
    }

    if let Some(coil) = plan.set_coil {
        client
            .write_single_coil(coil, true, unit)
            .context("write error: cannot set the coil")?;
        println!("{}", format::coil_new_status(coil, true));
    }

    if let Some(coil) = plan.toggle_coil {
        let new_status = client
            .toggle_coil(coil, unit)
            .context("toggle error: cannot toggle coil")?;
        println!("{}", format::coil_new_status(coil, new_status));
    }

    if let Some(coil) = plan.unset_coil {
        client
            .write_single_coil(coil, false, unit)
            .context("write error: cannot unset the coil")?;
        println!("{}", format::coil_new_status(coil, false));
    }

    if let Some((start, count)) = plan.read_registers {
        let registers = client
            .read_holding_registers(start, count, unit)
            .context("read error: cannot read registers value")?;
        for (offset, value) in registers.iter().enumerate() {
            println!("{}", format::register_value(start + offset as i32, *value as i32));
        }
    }

    if let Some((register, value)) = plan.write_register {
        client
            .write_single_register(register, value, unit)
            .context("write error: cannot write to the register")?;
        println!("{}", format::register_new_value(register, value));
    }

    client
        .disconnect()
        .context("disconnect error: cannot disconnect from PLC")?;
    Ok(())
}
