// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use clap::Parser;
use std::io::Write;
use tiered_qoe_sim::tier3::FleetUplink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Mode {
    /// Discrete-event simulation
    Sim,
    /// Real-time streaming with producer and controller tasks
    Stream,
}

#[derive(Debug, clap::Parser)]
#[command(long_about = None)]
struct Args {
    /// Execution mode
    #[arg(long, value_enum, default_value_t = Mode::Sim)]
    mode: Mode,
    /// NDJSON file with the SLAM events. Synthetic events are generated if
    /// neither this nor --voice-input are given
    #[arg(long)]
    slam_input: Option<String>,
    /// NDJSON file with the voice recognition events
    #[arg(long)]
    voice_input: Option<String>,
    /// Number of synthetic events generated per run
    #[arg(long, default_value_t = 200)]
    num_events: usize,
    /// Fraction of synthetic events that are voice recognition events
    #[arg(long, default_value_t = 0.3)]
    voice_share: f64,
    /// Average inter-arrival between synthetic events, in s
    #[arg(long, default_value_t = 0.05)]
    mean_interarrival: f64,
    /// Duration of the simulation, in ms. Run until all tasks complete if not given
    #[arg(long)]
    horizon: Option<f64>,
    /// Interval between consecutive events when they are ingested, in ms
    #[arg(long, default_value_t = 5.0)]
    arrival_gap: f64,
    /// Replay the event timestamps instead of using a fixed arrival gap
    #[arg(long, default_value_t = false)]
    replay_timestamps: bool,
    /// Number of tasks that triggers a Tier-1 flush
    #[arg(long, default_value_t = 5)]
    batch_size: usize,
    /// Number of tasks that triggers a Tier-2 flush
    #[arg(long, default_value_t = 5)]
    tier2_batch_size: usize,
    /// Maximum time a non-empty buffer waits before being flushed, in ms
    #[arg(long, default_value_t = 100.0)]
    flush_interval: f64,
    /// Offload time admitted to Tier-2 per epoch, in ms
    #[arg(long, default_value_t = 100.0)]
    tier2_budget: f64,
    /// Duration of a Tier-2 budget epoch, in ms
    #[arg(long, default_value_t = 1000.0)]
    tier2_epoch: f64,
    /// Tier-1 scheduling algorithm, one of: dif-min, dif-heft
    #[arg(long, default_value_t = String::from("dif-heft"))]
    algorithm: String,
    /// Tier-1 resources with their execution time factors
    #[arg(long, default_value_t = String::from("CPU:1.0,GPU:0.5,DSP:0.8"))]
    resources: String,
    /// Local processing frequency
    #[arg(long, default_value_t = 50.0)]
    f_local: f64,
    /// Remote processing frequency
    #[arg(long, default_value_t = 200.0)]
    f_remote: f64,
    /// Static local energy, in J
    #[arg(long, default_value_t = 0.5)]
    alpha: f64,
    /// Dynamic local energy per ms, in J
    #[arg(long, default_value_t = 0.2)]
    beta: f64,
    /// Upload rate
    #[arg(long, default_value_t = 10.0)]
    rate_in: f64,
    /// Download rate
    #[arg(long, default_value_t = 10.0)]
    rate_out: f64,
    /// Transmission power
    #[arg(long, default_value_t = 0.3)]
    p_in: f64,
    /// Reception power
    #[arg(long, default_value_t = 0.2)]
    p_out: f64,
    /// Initial seed to initialize the pseudo-random number generators
    #[arg(long, default_value_t = 0)]
    seed_init: u64,
    /// Final seed to initialize the pseudo-random number generators
    #[arg(long, default_value_t = 1)]
    seed_end: u64,
    /// Number of parallel workers
    #[arg(long, default_value_t = std::thread::available_parallelism().unwrap().get())]
    concurrency: usize,
    /// Name of the path where to save the metrics collected.
    #[arg(long, default_value_t = String::from("data/"))]
    output_path: String,
    /// Append to the output file.
    #[arg(long, default_value_t = false)]
    append: bool,
    /// Additional fields recorded in the CSV output file.
    #[arg(long, default_value_t = String::from(""))]
    additional_fields: String,
    /// Header of additional fields recorded in the CSV output file.
    #[arg(long, default_value_t = String::from(""))]
    additional_header: String,
    /// Identifier of the vehicle reported to Tier-3
    #[arg(long, default_value_t = String::from("veh_A"))]
    vehicle_id: String,
    /// Region where the vehicle operates, used for hazard reports
    #[arg(long, default_value_t = String::from("Zone-1"))]
    region: String,
}

fn open_output_file(
    path: &str,
    filename: &str,
    append: bool,
    header: &str,
) -> anyhow::Result<std::fs::File> {
    let output_single_filename = format!("{}{}", path, filename);
    let add_header = !append
        || match std::fs::metadata(&output_single_filename) {
            Ok(metadata) => metadata.len() == 0,
            Err(_) => true,
        };
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .append(append)
        .create(true)
        .truncate(!append)
        .open(output_single_filename)?;
    if add_header {
        writeln!(&mut f, "{}", header)?;
    }
    Ok(f)
}

type Events = Vec<(tiered_qoe_sim::task::TaskKind, tiered_qoe_sim::input::SensorEvent)>;

fn load_recorded(args: &Args) -> anyhow::Result<Option<Events>> {
    if args.slam_input.is_none() && args.voice_input.is_none() {
        return Ok(None);
    }
    let mut streams = vec![];
    for (path, kind) in [
        (&args.slam_input, tiered_qoe_sim::task::TaskKind::Slam),
        (
            &args.voice_input,
            tiered_qoe_sim::task::TaskKind::VoiceRecognition,
        ),
    ] {
        if let Some(path) = path {
            let events = tiered_qoe_sim::input::load_stream(std::path::Path::new(path), &kind)?;
            log::info!("loaded {} {} events from {}", events.len(), kind, path);
            streams.push(events);
        }
    }
    Ok(Some(tiered_qoe_sim::input::merge_streams(streams)))
}

fn make_events(args: &Args, recorded: &Option<std::sync::Arc<Events>>, seed: u64) -> anyhow::Result<Events> {
    match recorded {
        Some(events) => Ok(events.as_ref().clone()),
        None => tiered_qoe_sim::generator::EventFactory::new(seed, args.mean_interarrival)?
            .generate(args.num_events, args.voice_share),
    }
}

async fn run_stream(args: &Args, config: tiered_qoe_sim::simulation::Config, events: Events) -> anyhow::Result<()> {
    let stream_config = tiered_qoe_sim::stream::StreamConfig::from(&config);
    let reports = tiered_qoe_sim::stream::run_streaming(stream_config, events).await?;
    log::info!(
        "{} batches flushed, {} to Tier-2",
        reports.len(),
        reports
            .iter()
            .filter(|r| r.tier() == tiered_qoe_sim::task::Tier::Edge)
            .count()
    );

    let mut batches_file = open_output_file(
        &args.output_path,
        "batches.csv",
        args.append,
        format!(
            "{}{},tier,flushed_at,task,resource,fallback",
            args.additional_header,
            tiered_qoe_sim::simulation::Config::header()
        )
        .as_str(),
    )?;
    for report in reports {
        match report {
            tiered_qoe_sim::stream::BatchReport::Local {
                flushed_at,
                tasks,
                allocations,
            } => {
                for allocation in allocations {
                    let resource = &config.resources[allocation.resource].name;
                    log::info!("{} -> {}", allocation.task_id, resource);
                    writeln!(
                        &mut batches_file,
                        "{}{},Tier-1,{},{},{},{}",
                        args.additional_fields,
                        config.to_csv(),
                        flushed_at,
                        allocation.task_id,
                        resource,
                        tasks[allocation.index].fallen_back()
                    )?;
                }
            }
            tiered_qoe_sim::stream::BatchReport::Remote {
                flushed_at,
                executed,
                fallback,
            } => {
                for task in executed {
                    log::info!("{} -> Tier-2", task.id());
                    writeln!(
                        &mut batches_file,
                        "{}{},Tier-2,{},{},,false",
                        args.additional_fields,
                        config.to_csv(),
                        flushed_at,
                        task.id()
                    )?;
                }
                for task_id in fallback {
                    log::info!("{} pushed back to Tier-1", task_id);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    anyhow::ensure!(
        args.additional_fields.matches(',').count() == args.additional_header.matches(',').count(),
        "--additional_fields and --additional_header have a different number of commas"
    );
    anyhow::ensure!(args.seed_end > args.seed_init, "empty seed range");

    let algorithm = args
        .algorithm
        .parse::<tiered_qoe_sim::tier1::Algorithm>()
        .map_err(|err| anyhow::anyhow!(err))?;
    let base_config = tiered_qoe_sim::simulation::Config {
        seed: args.seed_init,
        horizon: args.horizon,
        arrival_gap: args.arrival_gap,
        replay_timestamps: args.replay_timestamps,
        batch_size: args.batch_size,
        tier2_batch_size: args.tier2_batch_size,
        flush_interval: args.flush_interval,
        tier2_budget: args.tier2_budget,
        tier2_epoch: args.tier2_epoch,
        algorithm,
        cost_model: tiered_qoe_sim::qoe::CostModel {
            f_local: args.f_local,
            f_remote: args.f_remote,
            alpha: args.alpha,
            beta: args.beta,
            rate_in: args.rate_in,
            rate_out: args.rate_out,
            p_in: args.p_in,
            p_out: args.p_out,
        },
        resources: tiered_qoe_sim::tier1::parse_resources(&args.resources)?,
    };
    base_config.validate()?;

    let recorded = load_recorded(&args)?.map(std::sync::Arc::new);

    if args.mode == Mode::Stream {
        let events = make_events(&args, &recorded, args.seed_init)?;
        return run_stream(&args, base_config, events).await;
    }

    // create the configurations of all the experiments
    let configurations = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
    for seed in args.seed_init..args.seed_end {
        let events = make_events(&args, &recorded, seed)?;
        configurations.lock().unwrap().push((
            tiered_qoe_sim::simulation::Config {
                seed,
                ..base_config.clone()
            },
            events,
        ));
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for i in 0..std::cmp::min(args.concurrency, (args.seed_end - args.seed_init) as usize) {
        let tx = tx.clone();
        let configurations = configurations.clone();
        tokio::spawn(async move {
            log::info!("spawned worker #{}", i);
            loop {
                let job;
                {
                    if let Some(val) = configurations.lock().unwrap().pop() {
                        job = val;
                    } else {
                        break;
                    }
                }
                let (config, events) = job;
                let seed = config.seed;
                match tiered_qoe_sim::simulation::Simulation::new(config, events) {
                    Ok(mut sim) => {
                        if tx.send((seed, sim.run())).is_err() {
                            log::error!("could not send the output of seed {}", seed);
                        }
                    }
                    Err(err) => log::error!("error when running simulation: {}", err),
                };
            }
            log::info!("terminated worker #{}", i);
        });
    }
    let _ = || tx;

    // wait until all the simulations have been done
    let mut outputs = vec![];
    while let Some(output) = rx.recv().await {
        outputs.push(output);
    }
    outputs.sort_by_key(|(seed, _)| *seed);

    // save output to files
    anyhow::ensure!(!outputs.is_empty(), "no simulation completed");
    let mut single_file = open_output_file(
        &args.output_path,
        "single.csv",
        args.append,
        format!(
            "{}{},{},{}",
            args.additional_header,
            tiered_qoe_sim::simulation::Config::header(),
            tiered_qoe_sim::metrics::MetricsSnapshot::header(),
            outputs[0].1.single.header()
        )
        .as_str(),
    )?;
    let mut completions_file = open_output_file(
        &args.output_path,
        "completions.csv",
        args.append,
        format!(
            "{}{},{}",
            args.additional_header,
            tiered_qoe_sim::simulation::Config::header(),
            tiered_qoe_sim::output::Completion::header()
        )
        .as_str(),
    )?;

    let mut cloud = tiered_qoe_sim::tier3::CloudAggregator::new();
    let mut snapshots = vec![];
    for (seed, output) in outputs {
        writeln!(
            &mut single_file,
            "{}{},{},{}",
            args.additional_fields,
            output.config_csv,
            output.metrics.to_csv(),
            output.single.to_csv()
        )?;

        let vehicle_id = format!("{}-{}", args.vehicle_id, seed);
        for completion in &output.completions {
            writeln!(
                &mut completions_file,
                "{}{},{}",
                args.additional_fields,
                output.config_csv,
                completion.to_csv()
            )?;
            cloud.collect_data(&vehicle_id, serde_json::to_value(completion)?);
            if completion.task_type == tiered_qoe_sim::task::TaskKind::Slam
                && completion.qoe_class == tiered_qoe_sim::task::QoeClass::Safety
            {
                cloud.report_hazard(&vehicle_id, "obstacle", &args.region);
            }
        }
        cloud.update_fleet_status(
            &vehicle_id,
            tiered_qoe_sim::tier3::FleetStatus {
                battery: None,
                speed: None,
                location: Some(args.region.clone()),
                event: Some(format!(
                    "{} tasks completed, {} deadline misses",
                    output.metrics.total_tasks, output.metrics.deadline_miss
                )),
            },
        );

        if let Some(event) = cloud.status(&vehicle_id).and_then(|s| s.event.as_deref()) {
            log::info!(
                "{}: {}, miss ratio {:.3}, {} fallbacks",
                vehicle_id,
                event,
                output.metrics.miss_ratio,
                output.metrics.fallbacks
            );
        }
        snapshots.push(serde_json::json!({
            "seed": seed,
            "metrics": output.metrics,
        }));
    }

    log::info!("{} logs collected by Tier-3", cloud.data_lake().len());
    let fleet = serde_json::json!({
        "report": cloud.fleet_report(),
        "hazards": cloud.distribute_hazards(Some(&args.region)),
    });
    std::fs::write(
        format!("{}metrics.json", args.output_path),
        serde_json::to_string_pretty(&snapshots)?,
    )?;
    std::fs::write(
        format!("{}fleet.json", args.output_path),
        serde_json::to_string_pretty(&fleet)?,
    )?;

    Ok(())
}
