//! walletsync CLI - inspect and reset the persisted wallet session
//!
//!   walletsync status            → persisted session record (or null)
//!   walletsync pending           → live OAuth redirect marker (or null)
//!   walletsync clear             → full disconnect of the persisted session
//!   walletsync config            → effective engine configuration
//!
//! Output format:
//!   --json     Output raw JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use walletsync::core::keys::env as keys;
use walletsync::logging::init_logging;
use walletsync::{Bus, FileKv, SessionStore, Source, SyncConfig};

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("walletsync {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("status") => cmd_status(&opts),
        Some("pending") => cmd_pending(&opts),
        Some("clear") => cmd_clear(&opts),
        Some("config") => cmd_config(&opts),
        Some(cmd) => Err(anyhow::anyhow!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = opts.pretty || (!opts.json && std::io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": e.to_string()}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let text = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    text.unwrap_or_else(|_| "null".to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    app: Option<String>,
    data_dir: Option<String>,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--app" | "-a" => {
                    if i + 1 < args.len() {
                        opts.app = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--data-dir" | "-d" => {
                    if i + 1 < args.len() {
                        opts.data_dir = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }

        // Environment is lower priority than CLI args
        if opts.app.is_none() {
            opts.app = env::var(keys::APP).ok().filter(|s| !s.is_empty());
        }
        opts
    }

    fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::from_env();
        if let Some(app) = &self.app {
            config.app = app.clone();
        }
        config
    }
}

fn open_store(opts: &ParsedArgs) -> anyhow::Result<SessionStore> {
    let config = opts.config();
    let kv = match &opts.data_dir {
        Some(dir) => FileKv::at(PathBuf::from(dir))?,
        None => FileKv::open(&config.app)?,
    };
    debug!(dir = %kv.dir().display(), app = %config.app, "opened session store");
    Ok(SessionStore::with_pending_ttl(Arc::new(kv), Bus::new(), config.pending_ttl()))
}

fn cmd_status(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let store = open_store(opts)?;
    match store.try_load()? {
        Some(session) => Ok(serde_json::to_value(&session)?),
        None => Ok(json!({"session": null})),
    }
}

fn cmd_pending(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let store = open_store(opts)?;
    match store.pending_redirect() {
        Some(marker) => Ok(json!({
            "providerType": marker.provider_type,
            "createdAt": marker.created_at,
            "expiresInSecs": store.pending_ttl().as_secs() as i64
                - chrono::Utc::now().signed_duration_since(marker.created_at).num_seconds(),
        })),
        None => Ok(json!({"pending": null})),
    }
}

fn cmd_clear(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let store = open_store(opts)?;
    let had_session = store.try_load()?.is_some();
    store.clear(Source::External)?;
    Ok(json!({"cleared": had_session}))
}

fn cmd_config(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let config = opts.config();
    Ok(json!({
        "app": config.app,
        "debounceMs": config.debounce_ms,
        "pollMs": config.poll_ms,
        "maxUpgradeAttempts": config.max_upgrade_attempts,
        "upgradeTimeoutMs": config.upgrade_timeout_ms,
        "pendingTtlSecs": config.pending_ttl_secs,
        "tickMs": config.tick_ms,
        "dataDir": walletsync::store::data_dir(&config.app),
    }))
}

fn print_usage() {
    println!(
        r#"walletsync - persisted wallet session inspector

USAGE:
    walletsync <command> [options]

COMMANDS:
    status                  Print the persisted session record
    pending                 Print the live OAuth redirect marker (state withheld)
    clear                   Full disconnect: delete session and redirect marker
    config                  Print the effective engine configuration

OPTIONS:
    --app, -a <name>        Application name (env: WALLETSYNC_APP)
    --data-dir, -d <path>   Read the store from this directory instead
    --json                  Raw JSON output
    --pretty                Pretty-print JSON
    --help, -h              Show this help
    --version, -V           Show version

ENVIRONMENT:
    WALLETSYNC_ROOT         Storage root (default: platform local data dir)
    WALLETSYNC_LOG_JSON=1   JSON log lines on stderr
    RUST_LOG                Log filter (default: info)
"#
    );
}
