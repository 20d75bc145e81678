use clap::{Arg, ArgAction, ArgMatches, Command};
use inproc_host::config::HostConfig;
use inproc_host::{CallGateway, LoadOptions, PluginError, Registry};
use log::info;

mod output;

fn main() {
    let cli = Command::new("inproc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Load in-process plugins and call them through the plugin_call_json ABI");

    let cli = setup_cli(cli);
    let matches = cli.get_matches();
    init_logging(matches.get_count("verbose"));

    match dispatch_commands(&matches) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", output::error_line(&e));
            std::process::exit(1);
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Sets up the CLI with subcommands and arguments.
fn setup_cli(cli: Command) -> Command {
    let library = Arg::new("library")
        .help("Path to the plugin shared library")
        .required(true)
        .index(1);
    let concurrent = Arg::new("concurrent")
        .help("Declare the plugin thread-safe (calls are not serialized)")
        .long("concurrent")
        .action(ArgAction::SetTrue);

    cli.arg(
        Arg::new("verbose")
            .help("Increase log output (-v info, -vv debug)")
            .short('v')
            .long("verbose")
            .action(ArgAction::Count)
            .global(true),
    )
    .subcommand(
        Command::new("inspect")
            .about("Load a library, validate its ABI and describe it")
            .arg(library.clone())
            .arg(concurrent.clone()),
    )
    .subcommand(
        Command::new("call")
            .about("Call one function on a plugin and print the response")
            .arg(library)
            .arg(
                Arg::new("function")
                    .help("Function name passed to plugin_call_json")
                    .required(true)
                    .index(2),
            )
            .arg(
                Arg::new("args")
                    .help("JSON argument payload (omitted: null)")
                    .index(3),
            )
            .arg(concurrent)
            .arg(
                Arg::new("pretty")
                    .help("Pretty-print the JSON response")
                    .short('p')
                    .long("pretty")
                    .action(ArgAction::SetTrue),
            ),
    )
    .subcommand(
        Command::new("batch")
            .about("Load every plugin in a host config and run its configured calls")
            .arg(
                Arg::new("config")
                    .help("Host config file (default: $INPROC_HOST_CONFIG or ./inproc.json)")
                    .short('c')
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .value_name("FILE"),
            ),
    )
}

/// Dispatches the command based on the parsed arguments and returns the
/// process exit code.
fn dispatch_commands(matches: &ArgMatches) -> Result<i32, PluginError> {
    match matches.subcommand() {
        Some(("inspect", sub_m)) => inspect(sub_m),
        Some(("call", sub_m)) => call(sub_m),
        Some(("batch", sub_m)) => batch(sub_m),
        _ => {
            println!("No valid subcommand was used. Use --help for more information.");
            Ok(2)
        }
    }
}

fn load_options(sub_m: &ArgMatches) -> LoadOptions {
    if sub_m.get_flag("concurrent") {
        LoadOptions::concurrent()
    } else {
        LoadOptions::default()
    }
}

fn inspect(sub_m: &ArgMatches) -> Result<i32, PluginError> {
    let library = sub_m.get_one::<String>("library").expect("required argument");
    let registry = Registry::new();
    let key = registry.load_with(library, load_options(sub_m))?;
    let handle = registry.lookup(&key)?;
    println!("{}", output::plugin_table(&handle));
    drop(handle);
    registry.unload(&key)?;
    Ok(0)
}

fn call(sub_m: &ArgMatches) -> Result<i32, PluginError> {
    let library = sub_m.get_one::<String>("library").expect("required argument");
    let function = sub_m.get_one::<String>("function").expect("required argument");
    let args = sub_m.get_one::<String>("args");

    let registry = Registry::new();
    let key = registry.load_with(library, load_options(sub_m))?;
    let gateway = CallGateway::new(&registry);

    let result = gateway.call(&key, Some(function.as_str()), args.map(|a| a.as_bytes()))?;
    let text = gateway.response_text(&result);
    gateway.release(&result)?;
    let text = text?;

    if sub_m.get_flag("pretty") {
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| PluginError::InvalidResponse {
                plugin: key.clone(),
                reason: e.to_string(),
            })?;
        println!("{:#}", value);
    } else {
        println!("{}", text);
    }

    registry.unload(&key)?;
    Ok(0)
}

fn batch(sub_m: &ArgMatches) -> Result<i32, PluginError> {
    let path = HostConfig::resolve_path(sub_m.get_one::<String>("config")).ok_or_else(|| {
        PluginError::Config("no config file given and ./inproc.json does not exist".to_string())
    })?;
    let config = HostConfig::load_from_file(&path)?;
    info!("host config {} lists {} plugin(s)", path.display(), config.plugins.len());
    let registry = Registry::with_config(&config);
    let gateway = CallGateway::new(&registry);

    let mut rows = Vec::new();
    for (plugin, loaded) in config.plugins.iter().zip(registry.load_configured(&config)) {
        match loaded {
            Ok(key) => {
                for spec in &plugin.calls {
                    let outcome = gateway
                        .call_json(&key, &spec.function, &spec.args)
                        .map(|v| v.to_string())
                        .map_err(|e| e.to_string());
                    rows.push(output::CallRow {
                        plugin: key.clone(),
                        function: spec.function.clone(),
                        outcome,
                    });
                }
            }
            Err(e) => rows.push(output::CallRow {
                plugin: plugin.path.display().to_string(),
                function: "-".to_string(),
                outcome: Err(e.to_string()),
            }),
        }
    }

    println!("{}", output::calls_table(&rows));
    println!("{}", output::ledger_summary(registry.ledger()));

    let busy = registry.shutdown();
    let failed = rows.iter().filter(|r| r.outcome.is_err()).count();
    Ok(if failed > 0 || !busy.is_empty() { 1 } else { 0 })
}
