mod app_context;
mod backends;
mod cache_store;
mod catalog_format;
mod config;
mod config_persistence;
mod db_manager;
mod error;
mod external_catalog;
mod index_builder;
mod index_worker;
mod naming;
mod path_filter;
mod protocol;
mod registry;
mod search_engine;
mod search_orchestrator;
mod single_flight;
mod taxonomy;

use std::time::Duration;

use log::{info, warn};

use app_context::{AppContext, IndexWaitOutcome, PersistencePaths};
use config_persistence::{cache_root, default_config_path, load_or_create_config};
use protocol::EntityDescriptor;

const DEBUG_ENV_VAR: &str = "ARTSCOUT_DEBUG";
const INDEX_BUILD_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const USAGE: &str = "usage: artscout [--reset] [--rebuild] <name> [type] [subtype]\n       artscout --reset";

struct CliArgs {
    /// Absent only for a bare `--reset`.
    descriptor: Option<EntityDescriptor>,
    rebuild: bool,
    reset: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Option<CliArgs> {
    let mut rebuild = false;
    let mut reset = false;
    let mut positional = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--rebuild" => rebuild = true,
            "--reset" => reset = true,
            _ => positional.push(arg),
        }
    }
    if positional.is_empty() {
        return (reset && !rebuild).then_some(CliArgs {
            descriptor: None,
            rebuild,
            reset,
        });
    }
    if positional.len() > 3 || positional[0].trim().is_empty() {
        return None;
    }
    let mut positional = positional.into_iter();
    let name = positional.next().unwrap_or_default();
    let entity_type = positional.next().unwrap_or_default();
    let subtype = positional.next().unwrap_or_default();
    Some(CliArgs {
        descriptor: Some(EntityDescriptor::new(name, entity_type, subtype)),
        rebuild,
        reset,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    let level = if std::env::var_os(DEBUG_ENV_VAR).is_some() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    clog.filter(None, level);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let Some(cli) = parse_args(std::env::args().skip(1)) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let paths = PersistencePaths {
        config_file: default_config_path(),
        cache_root: cache_root(),
    };
    let config = load_or_create_config(&paths.config_file);
    let mut context = AppContext::start(config, paths, None)?;
    info!(
        "Session started. config={} cache={}",
        context.paths().config_file.display(),
        context.paths().cache_root.display()
    );

    if cli.reset {
        context.reset()?;
    }
    let Some(descriptor) = cli.descriptor else {
        context.shutdown();
        return Ok(());
    };

    if let Err(err) = context.ensure_external_catalog() {
        warn!("Bulk catalog unavailable: {}. {}", err, err.remediation());
        if err.is_retryable() {
            info!("Bulk catalog will be retried next session");
        }
    }

    if cli.rebuild || !context.index_restored() {
        if context.request_index_build(cli.rebuild)? {
            match context.wait_for_index(INDEX_BUILD_TIMEOUT) {
                Ok(IndexWaitOutcome::Ready {
                    records,
                    from_cache,
                }) => info!("Index ready: {} records (from_cache={})", records, from_cache),
                Ok(IndexWaitOutcome::Cancelled) => warn!("Index build cancelled"),
                Ok(IndexWaitOutcome::TimedOut) => {
                    warn!("Index build still running after {:?}; cancelling", INDEX_BUILD_TIMEOUT);
                    context.cancel_index_build()?;
                }
                Err(err) => warn!("Index build failed: {}. {}", err, err.remediation()),
            }
        }
    }

    context.begin_operation();
    let results = context.search(&descriptor);
    let auto_apply = context
        .orchestrator()
        .auto_apply_choice(&results)
        .map(|choice| choice.path.clone());
    let output = serde_json::json!({
        "query": descriptor,
        "priority": context.config().search.priority,
        "autoApply": auto_apply,
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    context.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_args;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_parse_args_fills_missing_fields_with_empty_strings() {
        let cli = parse_args(args(&["Grak"])).expect("name only");
        let descriptor = cli.descriptor.expect("descriptor");
        assert_eq!(descriptor.name, "Grak");
        assert!(descriptor.entity_type.is_empty());
        assert!(!cli.rebuild);
        assert!(!cli.reset);

        let cli = parse_args(args(&["--rebuild", "Grak", "humanoid", "orc, goblin"]))
            .expect("full descriptor");
        assert!(cli.rebuild);
        assert_eq!(cli.descriptor.expect("descriptor").subtype, "orc, goblin");
    }

    #[test]
    fn test_parse_args_accepts_reset_with_or_without_query() {
        let cli = parse_args(args(&["--reset"])).expect("bare reset");
        assert!(cli.reset);
        assert!(cli.descriptor.is_none());

        let cli = parse_args(args(&["--reset", "Grak"])).expect("reset then query");
        assert!(cli.reset);
        assert_eq!(cli.descriptor.expect("descriptor").name, "Grak");

        assert!(parse_args(args(&["--reset", "--rebuild"])).is_none());
    }

    #[test]
    fn test_parse_args_rejects_missing_or_extra_arguments() {
        assert!(parse_args(args(&[])).is_none());
        assert!(parse_args(args(&["  "])).is_none());
        assert!(parse_args(args(&["a", "b", "c", "d"])).is_none());
    }
}
