//! flashdict - inspect and edit hash mappings on a RESP server
//!
//! Opens one hash as a mapping and runs a single command against it.

use anyhow::{bail, Context};
use flashdict::backend::RespBackend;
use flashdict::mapping::HashMapping;
use flashdict::serialization::{Binary, Json, Loaded, PassThrough, Serializer};
use flashdict::{HashClient, SerializerKind, StoreConfig};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// What to do with the mapping.
#[derive(Debug)]
enum Action {
    Get(String),
    Set(String, String),
    Del(String),
    Keys,
    Len,
    Items,
}

struct Cli {
    config: StoreConfig,
    hash: String,
    action: Action,
}

impl Cli {
    /// Parse command-line arguments on top of the environment
    fn from_args() -> anyhow::Result<Self> {
        let mut config = StoreConfig::from_env()?;
        let args: Vec<String> = std::env::args().collect();
        let mut positional = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i, "--host")?.to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = value_of(&args, i, "--port")?
                        .parse()
                        .context("invalid port number")?;
                    i += 2;
                }
                "--serializer" | "-s" => {
                    config.serializer = value_of(&args, i, "--serializer")?.parse()?;
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("flashdict version {}", flashdict::VERSION);
                    std::process::exit(0);
                }
                flag if flag.starts_with('-') => bail!("unknown argument: {}", flag),
                other => {
                    positional.push(other.to_string());
                    i += 1;
                }
            }
        }

        let mut positional = positional.into_iter();
        let (Some(command), Some(hash)) = (positional.next(), positional.next()) else {
            print_help();
            bail!("expected <COMMAND> <HASH>");
        };
        let mut operand = |what: &str| {
            positional
                .next()
                .with_context(|| format!("{} requires a {}", command, what))
        };

        let action = match command.as_str() {
            "get" => Action::Get(operand("key")?),
            "set" => Action::Set(operand("key")?, operand("value")?),
            "del" => Action::Del(operand("key")?),
            "keys" => Action::Keys,
            "len" => Action::Len,
            "items" => Action::Items,
            other => bail!("unknown command: {}", other),
        };

        Ok(Self { config, hash, action })
    }
}

fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{} requires a value", flag))
}

fn print_help() {
    println!(
        r#"
flashdict - inspect hash mappings on a Redis-compatible server

USAGE:
    flashdict [OPTIONS] <COMMAND> <HASH> [KEY] [VALUE]

COMMANDS:
    get <HASH> <KEY>            Print one value
    set <HASH> <KEY> <VALUE>    Store a value
    del <HASH> <KEY>            Delete a key
    keys <HASH>                 List keys
    len <HASH>                  Count entries
    items <HASH>                Print every key and value

OPTIONS:
    -h, --host <HOST>               Server host (default: 127.0.0.1)
    -p, --port <PORT>               Server port (default: 6379)
    -s, --serializer <FORMAT>       json, binary or raw (default: json)
    -v, --version                   Print version information
        --help                      Print this help message

ENVIRONMENT:
    FLASHDICT_HOST, FLASHDICT_PORT, FLASHDICT_SERIALIZER,
    FLASHDICT_CONNECT_TIMEOUT_MS    Defaults for the options above
    RUST_LOG                        Log filter (default: info)

EXAMPLES:
    flashdict set users 101 '{{"name": "Ariz"}}'
    flashdict --serializer raw get counters hits
"#
    );
}

fn render(loaded: &Loaded<Value>) -> String {
    match loaded {
        Loaded::Value(v) => v.to_string(),
        Loaded::Failed(failure) => format!("<unreadable: {}>", failure),
    }
}

/// Runs `action` against a mapping whose values convert through JSON.
async fn run<V, S>(
    mapping: HashMapping<V, S>,
    action: Action,
    parse: fn(&str) -> anyhow::Result<V>,
    show: fn(V) -> Value,
) -> anyhow::Result<()>
where
    S: Serializer<V>,
{
    match action {
        Action::Get(key) => match mapping.get(&key).await? {
            Some(loaded) => println!("{}", render(&loaded.map(show))),
            None => println!("(nil)"),
        },
        Action::Set(key, raw) => {
            mapping.set(&key, &parse(&raw)?).await?;
            println!("OK");
        }
        Action::Del(key) => {
            mapping.delete(&key).await?;
            println!("OK");
        }
        Action::Keys => {
            for key in mapping.keys().await? {
                println!("{}", key);
            }
        }
        Action::Len => println!("{}", mapping.len().await?),
        Action::Items => {
            for (key, loaded) in mapping.items().await? {
                println!("{}\t{}", key, render(&loaded.map(show)));
            }
        }
    }
    Ok(())
}

/// JSON text, or a plain string when the input is not JSON.
fn parse_json(raw: &str) -> anyhow::Result<Value> {
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

fn parse_text(raw: &str) -> anyhow::Result<String> {
    Ok(raw.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::from_args()?;
    let address = cli.config.address();

    let backend = RespBackend::connect(address.clone(), cli.config.connect_timeout)
        .await
        .with_context(|| format!("cannot connect to {}", address))?;
    info!(%address, hash = %cli.hash, serializer = %cli.config.serializer, "connected");

    let client = HashClient::new(Arc::new(backend));
    match cli.config.serializer {
        SerializerKind::Json => {
            let mapping: HashMapping<Value, Json> = HashMapping::new(client, cli.hash, Json);
            run(mapping, cli.action, parse_json, |v| v).await
        }
        SerializerKind::Binary => {
            let mapping: HashMapping<Value, Binary> = HashMapping::new(client, cli.hash, Binary);
            run(mapping, cli.action, parse_json, |v| v).await
        }
        SerializerKind::PassThrough => {
            let mapping: HashMapping<String, PassThrough> = HashMapping::new(client, cli.hash, PassThrough);
            run(mapping, cli.action, parse_text, Value::String).await
        }
    }
}
