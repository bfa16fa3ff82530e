use cell_index::config::{AppConfig, ConfigFile, ConfigProvider};
use cell_index::DatasetRegistry;

use kdam::tqdm;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Which task to carry out: build or write_settings
    #[arg(short, long, default_value = "build")]
    task: String,

    //Settings file (yaml); defaults are used when it does not exist
    #[arg(short, long, default_value = "settings.yaml")]
    settings: PathBuf,

    //Dataset to build; every configured dataset when omitted
    #[arg(short, long)]
    dataset: Option<String>,

    //Rebuild spatial indices even when a cache exists
    #[arg(short, long)]
    force: bool,
}

fn load_settings(filename: &Path) -> Result<AppConfig, Box<dyn std::error::Error + Send + Sync>> {

    return match filename.is_file() {
        true => Ok(AppConfig::from_file(filename)?),
        false => {
            info!("{} not found, using default settings", filename.display());
            Ok(AppConfig::default())
        },
    };
}

fn build(args: &Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {

    let app_config = load_settings(&args.settings)?;
    let provider = Arc::new(ConfigFile::new(Path::new(&app_config.config_path)));

    let names = match &args.dataset {
        Some(name) => vec![name.clone()],
        None => provider.dataset_names()?,
    };

    let registry = DatasetRegistry::open(provider, app_config)?;

    let mut failures: usize = 0;

    for name in tqdm!(names.iter()) {

        let start = Instant::now();

        match registry.ensure_loaded(name, args.force) {
            Ok(handle) => {
                let listed = registry.neighborhoods().list(name)?.len();
                info!("{}: {} cells, {} tree nodes, {} neighborhoods in {:.3}s",
                      name, handle.len(), handle.index.num_nodes(), listed, start.elapsed().as_secs_f64());
            },
            Err(e) => {
                error!("{}: {}", name, e);
                failures += 1;
            },
        }
    }

    match failures {
        0 => Ok(()),
        n => Err(format!("{} of {} datasets failed to build", n, names.len()).into()),
    }
}

fn write_settings(args: &Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {

    let config = load_settings(&args.settings)?;
    config.to_file(&args.settings)?;

    info!("wrote settings to {}", args.settings.display());

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {

    env_logger::init();

    let args = Args::parse();

    match args.task.as_str() {
        "build" => build(&args),
        "write_settings" => write_settings(&args),
        _ => Err(format!("Unknown task: {}", args.task).into()),
    }
}
