use anyhow::{anyhow, Result};
use clap::{arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use smc_structs::{
    config::{EstimatorConfig, OptimizerConfig, RuntimeConfig},
    core::ModelDescription,
};
use smc_utils::{compress_obj, jsonify, load_json};
use std::{fs, path::PathBuf};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "cuda")]
use {
    smc_estimators::Estimator,
    smc_optimizer::{driver::probe_count, Optimizer, ProbePool},
    smc_sampler::{
        automaton::{Automaton, Model},
        cuda::CudaBackend,
        kernel::TemplateKernelSource,
        DeviceContext, Probe,
    },
    smc_structs::core::{ProbeReport, TrajectoryRecord},
    tracing::info,
};

fn device_args(cmd: Command) -> Command {
    cmd.arg(
        arg!(<MODEL> "Model description json string or path to json file")
            .value_parser(clap::value_parser!(String)),
    )
    .arg(
        arg!(<KERNEL> "Path to the kernel source template")
            .value_parser(clap::value_parser!(PathBuf)),
    )
    .arg(
        arg!(--property <PROPERTY> "Monitored property, one estimator each (repeatable)")
            .action(ArgAction::Append)
            .required(true)
            .value_parser(clap::value_parser!(String)),
    )
    .arg(
        arg!(--estimator [ESTIMATOR] "Estimator json string or path to json file")
            .value_parser(clap::value_parser!(String)),
    )
    .arg(
        arg!(--config [CONFIG] "Runtime config json string or path to json file")
            .value_parser(clap::value_parser!(String)),
    )
    .arg(
        arg!(--output [OUTPUT_FILE] "If set, the output data will be saved to this file path (default json)")
            .value_parser(clap::value_parser!(PathBuf)),
    )
    .arg(
        arg!(--compress [COMPRESS] "If output file is set, the output data will be compressed as zlib")
            .action(ArgAction::SetTrue),
    )
    .arg(
        arg!(--gpu [GPU] "Which GPU device to use")
            .default_value("0")
            .value_parser(clap::value_parser!(usize)),
    )
}

fn cli() -> Command {
    Command::new("smc-runtime")
        .about("Statistical model checking and parameter search on a compute device")
        .arg_required_else_help(true)
        .arg(
            arg!(--"log-level" [LEVEL] "Log filter used when RUST_LOG is unset")
                .global(true)
                .default_value("info")
                .value_parser(clap::value_parser!(String)),
        )
        .subcommand(Command::new("list_devices").about("Lists available compute devices"))
        .subcommand(
            device_args(Command::new("simulate").about("Estimates the properties for one parameter vector"))
                .arg(
                    arg!(<PARAMETERS> "Parameter vector json array or path to json file")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    arg!(--offset [OFFSET] "First random stream used by the samples")
                        .default_value("0")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            device_args(Command::new("optimize").about("Searches adaptation parameters maximising the first property"))
                .arg(
                    arg!(--optimizer [OPTIMIZER] "Optimizer config json string or path to json file")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
}

fn main() {
    let matches = cli().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = match matches.subcommand() {
        Some(("list_devices", _)) => list_devices(),
        Some(("simulate", sub_m)) => DeviceArgs::parse(sub_m).and_then(|args| {
            simulate(
                args,
                sub_m.get_one::<String>("PARAMETERS").cloned().unwrap_or_default(),
                sub_m.get_one::<u64>("offset").copied().unwrap_or(0),
            )
        }),
        Some(("optimize", sub_m)) => DeviceArgs::parse(sub_m).and_then(|args| {
            optimize(args, sub_m.get_one::<String>("optimizer").cloned())
        }),
        _ => Err(anyhow!("Invalid subcommand")),
    } {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Arguments shared by every subcommand that samples on a device.
#[cfg_attr(not(feature = "cuda"), allow(dead_code))]
struct DeviceArgs {
    model: ModelDescription,
    kernel: PathBuf,
    properties: Vec<String>,
    estimator: EstimatorConfig,
    config: RuntimeConfig,
    output_file: Option<PathBuf>,
    compress: bool,
    gpu_device: usize,
}

impl DeviceArgs {
    fn parse(sub_m: &ArgMatches) -> Result<Self> {
        let model = sub_m
            .get_one::<String>("MODEL")
            .ok_or_else(|| anyhow!("MODEL is required"))?;
        let kernel = sub_m
            .get_one::<PathBuf>("KERNEL")
            .cloned()
            .ok_or_else(|| anyhow!("KERNEL is required"))?;
        Ok(Self {
            model: load_json(model)?,
            kernel,
            properties: sub_m
                .get_many::<String>("property")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            estimator: load_or_default(sub_m.get_one::<String>("estimator"))?,
            config: load_or_default(sub_m.get_one::<String>("config"))?,
            output_file: sub_m.get_one::<PathBuf>("output").cloned(),
            compress: sub_m.get_flag("compress"),
            gpu_device: sub_m.get_one::<usize>("gpu").copied().unwrap_or(0),
        })
    }
}

fn load_or_default<T>(arg: Option<&String>) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match arg {
        Some(arg) => load_json(arg),
        None => Ok(T::default()),
    }
}

#[cfg_attr(not(feature = "cuda"), allow(dead_code))]
fn write_output<T: Serialize>(data: &T, output_file: Option<&PathBuf>, compress: bool) -> Result<()> {
    if let Some(path) = output_file {
        if compress {
            fs::write(path, compress_obj(data)?)?;
        } else {
            fs::write(path, jsonify(data)?)?;
        }
        println!("output_data written to: {:?}", path);
    } else {
        println!("{}", jsonify(data)?);
    }
    Ok(())
}

pub fn list_devices() -> Result<()> {
    let devices = smc_sampler::list_devices()?;
    for device in devices.iter() {
        println!(
            "{}: {} ({}, max work group size {})",
            device.index,
            device.name,
            if device.is_gpu { "gpu" } else { "cpu" },
            device.max_work_group_size
        );
    }
    Ok(())
}

#[cfg(feature = "cuda")]
fn estimators(args: &DeviceArgs) -> Result<Vec<Box<dyn Estimator>>> {
    let template = smc_estimators::from_config(&args.estimator)?;
    Ok(args
        .properties
        .iter()
        .map(|property| {
            let mut estimator = template.clone();
            estimator.set_expression(property);
            estimator
        })
        .collect())
}

#[cfg(feature = "cuda")]
fn simulate(args: DeviceArgs, parameters: String, offset: u64) -> Result<()> {
    let parameters: Vec<f32> = load_json(&parameters)?;
    let model = Model::from_description(&args.model)?;
    smc_sampler::select_device(args.gpu_device)?;
    let ctx = DeviceContext::build(
        CudaBackend::new(args.gpu_device)?,
        &model,
        &args.properties,
        &TemplateKernelSource::new(&args.kernel),
        &args.config,
    )?;
    let mut probe = Probe::new(ctx, args.config.clone(), estimators(&args)?)?;
    let report: ProbeReport = probe.run(&parameters, offset)?;
    info!(
        "estimate {:.6} [{:.6}, {:.6}] from {} samples",
        report.estimate,
        report.lower(),
        report.upper(),
        report.samples_confirmed
    );
    write_output(&report, args.output_file.as_ref(), args.compress)
}

#[cfg(feature = "cuda")]
fn optimize(args: DeviceArgs, optimizer: Option<String>) -> Result<()> {
    let optimizer_config: OptimizerConfig = load_or_default(optimizer.as_ref())?;
    let model = Model::from_description(&args.model)?;
    smc_sampler::select_device(args.gpu_device)?;
    let n = probe_count(&optimizer_config, model.adaptation_branch_count());
    let backends = (0..n)
        .map(|_| CudaBackend::new(args.gpu_device))
        .collect::<smc_sampler::Result<Vec<_>>>()?;
    let pool = ProbePool::build(
        backends,
        &model,
        &args.properties,
        &TemplateKernelSource::new(&args.kernel),
        &args.config,
        &estimators(&args)?,
    )?;
    let result = Optimizer::new(pool, optimizer_config).run()?;
    info!(
        "best estimate {:.6} after {} records",
        result.best.estimate,
        result.trajectory.len()
    );
    let trajectory: Vec<TrajectoryRecord> = result.trajectory;
    write_output(&trajectory, args.output_file.as_ref(), args.compress)
}

#[cfg(not(feature = "cuda"))]
fn simulate(_args: DeviceArgs, _parameters: String, _offset: u64) -> Result<()> {
    Err(anyhow!("smc-runtime was not compiled with '--features cuda'"))
}

#[cfg(not(feature = "cuda"))]
fn optimize(_args: DeviceArgs, optimizer: Option<String>) -> Result<()> {
    let _: OptimizerConfig = load_or_default(optimizer.as_ref())?;
    Err(anyhow!("smc-runtime was not compiled with '--features cuda'"))
}
