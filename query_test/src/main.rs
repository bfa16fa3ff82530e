use cell_index::config::{AppConfig, ConfigFile};
use cell_index::{query, DatasetRegistry};

use log::info;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
#[derive(Parser, Debug)] #[command(author, version, about, long_about = None)]
struct Args {

    //Dataset to query
    #[arg(short, long)]
    dataset: String,

    //Settings file (yaml)
    #[arg(short, long, default_value = "settings.yaml")]
    settings: PathBuf,

    //Queries per radius
    #[arg(short, long, default_value_t = 10)]
    num_queries: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {

    env_logger::init();

    let args = Args::parse();

    let app_config = match args.settings.is_file() {
        true => AppConfig::from_file(&args.settings)?,
        false => AppConfig::default(),
    };
    let provider = Arc::new(ConfigFile::new(Path::new(&app_config.config_path)));
    let registry = DatasetRegistry::open(provider, app_config)?;

    let start = Instant::now();
    let dataset = registry.ensure_loaded(&args.dataset, false)?;
    info!("{}: loaded in {:.3}s", &args.dataset, start.elapsed().as_secs_f64());

    if dataset.is_empty() {
        info!("{}: no cells to query", &args.dataset);
        return Ok(());
    }

    let xs = dataset.cells.column(&dataset.config.x_coordinate).and_then(|c| c.to_f64_vec()).unwrap_or_default();
    let ys = dataset.cells.column(&dataset.config.y_coordinate).and_then(|c| c.to_f64_vec()).unwrap_or_default();

    let bounds = |v: &[f64]| (v.iter().copied().fold(f64::MAX, f64::min), v.iter().copied().fold(f64::MIN, f64::max));
    let (x_min, x_max) = bounds(&xs);
    let (y_min, y_max) = bounds(&ys);

    if x_min > x_max || y_min > y_max {
        return Err(format!("{} has no finite coordinates", &args.dataset).into());
    }

    let mut rng = rand::thread_rng();

    for _ in 0..args.num_queries {

        let (x, y) = (rng.gen_range(x_min..=x_max), rng.gen_range(y_min..=y_max));

        let start = Instant::now();
        let nearest = query::nearest_cell(&dataset, x, y)?;
        let duration = start.elapsed();

        info!("nearest ({:.1}, {:.1}): distance {:?} in {}s", x, y, nearest.map(|n| n.distance), duration.as_secs_f64());
    }

    for r in [10.0, 50.0, 100.0, 500.0].into_iter() {
        for _ in 0..args.num_queries {

            let (x, y) = (rng.gen_range(x_min..=x_max), rng.gen_range(y_min..=y_max));

            let start = Instant::now();
            let count = query::count_in_radius(&dataset, x, y, r)?;
            let duration = start.elapsed();

            info!("radius {}: {} cells in {}s", &r, &count, &duration.as_secs_f64());
        }
    }

    Ok(())
}
