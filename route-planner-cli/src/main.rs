use std::fs::File;
use std::io::BufWriter;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::executor::LocalPool;
use geo::Coord;
use log::{info, warn};
use route_planner::{Config, GeoJsonSurface, OsrmBackend, RouteListener, RouteState};

#[derive(Parser)]
struct Args {
    /// A stop on the route, as "longitude,latitude". Repeat for every stop, in order.
    #[arg(long = "waypoint", required = true, value_parser = parse_lon_lat)]
    waypoints: Vec<Coord>,

    /// After adding every waypoint, remove the one at this 0-based index. Can be repeated.
    #[arg(long)]
    remove: Vec<usize>,

    /// Path to a JSON file with configuration. Missing fields use defaults.
    #[arg(long)]
    config: Option<String>,

    /// The OSRM server to use, overriding the config
    #[arg(long)]
    osrm_url: Option<String>,

    /// GeoJSON file to write with the waypoints, every leg, and the overview line
    #[arg(long, default_value = "route.geojson")]
    output: String,

    #[arg(short, long)]
    verbose: bool,
}

struct LogListener;

impl RouteListener for LogListener {
    fn waypoints_changed(&self) {
        info!("Waypoints changed");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    simple_logger::init_with_level(if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    })?;

    let mut config = match args.config {
        Some(path) => {
            let raw =
                std::fs::read_to_string(&path).with_context(|| format!("Can't read {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("Bad config in {path}"))?
        }
        None => Config::default(),
    };
    if let Some(url) = args.osrm_url {
        config.osrm_url = url;
    }

    let backend = OsrmBackend::new(&config.osrm_url, Duration::from_secs(config.timeout_secs));
    let mut pool = LocalPool::new();
    let state = RouteState::new(GeoJsonSurface::new(), backend, pool.spawner(), config);
    state.set_listener(LogListener);
    state.toggle_active();

    for pt in args.waypoints {
        pool.run_until(state.add_waypoint(pt));
    }
    for idx in args.remove {
        pool.run_until(state.remove_waypoint(idx)?);
    }

    for ((from, to), leg) in state.leg_list_entries().into_iter().zip(state.legs()) {
        info!(
            "Stop {from} → stop {to}: {:.1} km, drawn in {}",
            leg.length_meters / 1000.0,
            leg.color
        );
    }
    if state.num_waypoints() >= 2 && !state.has_overview() {
        warn!("No route found through these waypoints");
    }

    let output = BufWriter::new(
        File::create(&args.output).with_context(|| format!("Can't create {}", args.output))?,
    );
    serde_json::to_writer_pretty(output, &state.surface().to_geojson())?;
    info!("Wrote {}", args.output);
    Ok(())
}

fn parse_lon_lat(raw: &str) -> Result<Coord, String> {
    let Some((lon, lat)) = raw.split_once(',') else {
        return Err(format!("{raw} should look like longitude,latitude"));
    };
    let x = lon
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("bad longitude {lon}: {err}"))?;
    let y = lat
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("bad latitude {lat}: {err}"))?;
    Ok(Coord { x, y })
}
