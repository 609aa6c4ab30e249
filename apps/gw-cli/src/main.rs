use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

use device_gateway::{Gateway, GatewayConfig, LocalMetadata, MemoryEventStore};
use device_registry as devreg;
use msg_transport::{Message, MockBus};

#[derive(Parser, Debug)]
#[command(
    name = "gw",
    version,
    about = "Device gateway CLI",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and compile device profiles
    ProfileValidate {
        /// Single profile YAML file
        #[arg(long)]
        file: Option<String>,
        /// Directory of profile YAML files
        #[arg(long)]
        dir: Option<String>,
        /// Print the parsed profiles as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List the commands a profile compiles to
    ProfileCommands {
        #[arg(long)]
        file: String,
    },
    /// Decode a raw wire value for one device object
    Decode {
        /// Profile YAML file
        #[arg(long)]
        file: String,
        /// Object name or wire field
        #[arg(long)]
        object: String,
        /// Raw value as received from the device (e.g., 0064)
        #[arg(long)]
        raw: String,
        /// Skip the scale/offset/base transform
        #[arg(long, action = ArgAction::SetTrue)]
        untransformed: bool,
    },
    /// Encode an engineering value for one device object
    Encode {
        #[arg(long)]
        file: String,
        #[arg(long)]
        object: String,
        #[arg(long)]
        value: String,
        /// Current register value, merged with the new field for masked objects
        #[arg(long)]
        current: Option<String>,
    },
    /// Run a command against simulated devices from a catalog directory
    Exec {
        /// Catalog directory with profiles/ and devices/
        #[arg(long, default_value = "configs/catalog")]
        catalog: String,
        /// Gateway config YAML (defaults when missing)
        #[arg(long, default_value = "configs/gateway.yaml")]
        config: String,
        /// Device name or `all`
        #[arg(long)]
        device: String,
        #[arg(long)]
        command: String,
        /// Write arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
        /// Simulated register values as FIELD=HEX, shared by every device
        #[arg(long = "register", value_delimiter = ',')]
        registers: Vec<String>,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::ProfileValidate { file, dir, json } => {
            profile_validate(file.as_deref(), dir.as_deref(), json)
        }
        Commands::ProfileCommands { file } => profile_commands(&file),
        Commands::Decode {
            file,
            object,
            raw,
            untransformed,
        } => value_decode(&file, &object, &raw, untransformed),
        Commands::Encode {
            file,
            object,
            value,
            current,
        } => value_encode(&file, &object, &value, current.as_deref()),
        Commands::Exec {
            catalog,
            config,
            device,
            command,
            args,
            registers,
        } => exec(&catalog, &config, &device, &command, args.as_deref(), &registers),
    }
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn compile(profile: &devreg::DeviceProfile) -> Result<devreg::DeviceTables> {
    let registry = devreg::ValueDescriptorRegistry::new();
    let compiled = devreg::compile_profile(profile, &registry)
        .with_context(|| format!("compiling profile {}", profile.name))?;
    Ok(compiled.tables)
}

fn profile_validate(file: Option<&str>, dir: Option<&str>, json: bool) -> Result<()> {
    let profiles = match (file, dir) {
        (Some(f), None) => vec![devreg::load_profile_file(f)?],
        (None, Some(d)) => {
            let reg = devreg::load_profiles_dir(d)?;
            let mut profiles: Vec<_> = reg.profiles.into_values().collect();
            profiles.sort_by(|a, b| a.name.cmp(&b.name));
            profiles
        }
        _ => return Err(anyhow!("provide --file <path> or --dir <dir>")),
    };
    for profile in &profiles {
        let tables = compile(profile)?;
        println!(
            "ok: {} (commands={}, objects={})",
            profile.name,
            tables.commands.len(),
            tables.objects.len()
        );
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
    }
    Ok(())
}

fn profile_commands(file: &str) -> Result<()> {
    let tables = compile(&devreg::load_profile_file(file)?)?;
    let mut names: Vec<&str> = tables.commands.names().collect();
    names.sort_unstable();
    for name in names {
        let Some(ops) = tables.commands.get(name) else {
            continue;
        };
        println!("{name}\tget={}\tset={}", ops.get.len(), ops.set.len());
    }
    Ok(())
}

fn object_of(file: &str, object: &str) -> Result<Arc<devreg::ObjectDescriptor>> {
    let tables = compile(&devreg::load_profile_file(file)?)?;
    tables
        .object(object)
        .or_else(|| tables.objects_for_field(object).into_iter().next())
        .cloned()
        .ok_or_else(|| anyhow!("no object {object} in {file}"))
}

fn value_decode(file: &str, object: &str, raw: &str, untransformed: bool) -> Result<()> {
    let obj = object_of(file, object)?;
    let mode = if untransformed {
        devreg::DecodeMode::Raw
    } else {
        devreg::DecodeMode::Transformed
    };
    let value = devreg::decode(&obj.property, raw, mode)?;
    println!("{}\t{value}", obj.name);
    Ok(())
}

fn value_encode(file: &str, object: &str, value: &str, current: Option<&str>) -> Result<()> {
    let obj = object_of(file, object)?;
    let op = devreg::ResourceOperation::on_object(devreg::Action::Set, obj.name.as_str());
    let arg = devreg::resolve_argument(&op, &obj.property, Some(value))
        .ok_or_else(|| anyhow!("no value for {}", obj.name))?;
    let raw = match current {
        Some(current) if obj.property.is_masked() => {
            let field = devreg::field_value(&obj.property, &arg)?;
            devreg::masked_merge(&obj.property, field, current)?
        }
        Some(_) | None => devreg::encode(&obj.property, &arg)?,
    };
    println!("{}\t{raw}", obj.wire_name());
    Ok(())
}

/// Register values per topic; a set stores its parameter, every command echoes the field.
fn simulate(bus: &MockBus, registers: &[String]) -> Result<()> {
    let mut defaults = HashMap::new();
    for entry in registers {
        let (field, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("register must be FIELD=HEX: {entry}"))?;
        defaults.insert(field.trim().to_string(), value.trim().to_string());
    }
    let state: Mutex<HashMap<String, HashMap<String, String>>> = Mutex::new(HashMap::new());
    bus.set_responder(move |address, msg| {
        let id = msg.get_str("uuid")?;
        let field = msg.get_str("name")?;
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let regs = state
            .entry(address.topic.clone())
            .or_insert_with(|| defaults.clone());
        if msg.get_str("cmd").as_deref() == Some("set") {
            regs.insert(field.clone(), msg.get_str("param")?);
        }
        let value = regs.get(&field)?.clone();
        Some(Message::new().with("uuid", id).with(field, value))
    });
    Ok(())
}

fn exec(
    catalog_dir: &str,
    config_path: &str,
    target: &str,
    command: &str,
    args: Option<&str>,
    registers: &[String],
) -> Result<()> {
    let config = GatewayConfig::load(config_path)?;
    let catalog = devreg::load_catalog_dir(catalog_dir)?;
    let devices: Vec<devreg::Device> = catalog.devices.values().cloned().collect();
    let bus = Arc::new(MockBus::new("mock0"));
    simulate(&bus, registers)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let gateway = Gateway::start(
            config,
            bus.clone(),
            Arc::new(LocalMetadata::new(catalog)),
            Arc::new(MemoryEventStore::new()),
        )
        .await?;
        for device in devices {
            gateway.add_device(device).await?;
        }
        info!(devices = gateway.devices().len(), "catalog loaded");
        let results = gateway.execute_target(target, command, args).await?;
        println!("{}", serde_json::to_string_pretty(&results)?);
        Ok::<_, anyhow::Error>(())
    })
}
