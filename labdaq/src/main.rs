//! Entry point for the labdaq dashboard. Parses args, resolves the rig and runs
//! the App (or the headless recorder).

use anyhow::bail;
use labdaq::{
    app::App,
    config::RunOptions,
    headless,
    inspect::{self, InspectRequest},
    logging::{self, LogTarget},
    rigs::{demo_rig, load_rig_file, load_rigs, save_rigs, RigEntry, RigRequest, ResolveRig},
};
use labdaq_core::SensorNamer;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

const USAGE_FLAGS: &str = "[--rig NAME|-r NAME] [--save] [--demo] [--headless] [--output FILE|-o FILE] [--duration SECS|-d SECS] [--calibration FILE] [--dry-run] [RIG_JSON] | --inspect FILE [--from SECS] [--to SECS] [--save-selection FILE]";

#[derive(Debug, Default)]
struct ParsedArgs {
    rig: Option<String>,
    rig_file: Option<PathBuf>,
    save: bool,
    demo: bool,
    headless: bool,
    output: Option<PathBuf>,
    duration: Option<Duration>,
    calibration: Option<PathBuf>,
    dry_run: bool,
    inspect: Option<InspectRequest>,
}

enum CliExit {
    Help(String),
    Invalid(String),
}

fn parse_duration(v: &str) -> Option<Duration> {
    v.parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn parse_seconds(v: &str) -> Option<f64> {
    v.parse::<f64>().ok().filter(|s| s.is_finite())
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, CliExit> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "labdaq".into());
    let usage = format!("Usage: {prog} {USAGE_FLAGS}");
    let invalid = |what: String| CliExit::Invalid(format!("{what}. {usage}"));
    let mut p = ParsedArgs::default();
    let mut inspect_file = None;
    let mut from = None;
    let mut to = None;
    let mut save_selection = None;

    while let Some(arg) = it.next() {
        // --flag=value forms
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| {
            inline
                .clone()
                .or_else(|| it.next())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| invalid(format!("{name} needs a value")))
        };
        match flag.as_str() {
            "-h" | "--help" => return Err(CliExit::Help(usage.clone())),
            "--rig" | "-r" => p.rig = Some(value("--rig")?),
            "--output" | "-o" => p.output = Some(PathBuf::from(value("--output")?)),
            "--duration" | "-d" => {
                let v = value("--duration")?;
                p.duration = Some(
                    parse_duration(&v)
                        .ok_or_else(|| invalid(format!("invalid --duration {v:?}")))?,
                );
            }
            "--calibration" => p.calibration = Some(PathBuf::from(value("--calibration")?)),
            "--inspect" => inspect_file = Some(PathBuf::from(value("--inspect")?)),
            "--from" | "--to" => {
                let v = value(&flag)?;
                let secs = parse_seconds(&v)
                    .ok_or_else(|| invalid(format!("invalid {flag} {v:?}")))?;
                if flag == "--from" {
                    from = Some(secs);
                } else {
                    to = Some(secs);
                }
            }
            "--save-selection" => {
                save_selection = Some(PathBuf::from(value("--save-selection")?))
            }
            "--save" => p.save = true,
            "--demo" => p.demo = true,
            "--headless" => p.headless = true,
            "--dry-run" => p.dry_run = true,
            _ if arg.starts_with('-') => return Err(invalid(format!("Unknown flag {arg}"))),
            _ => {
                if p.rig_file.is_none() {
                    p.rig_file = Some(PathBuf::from(arg));
                } else {
                    return Err(invalid("Unexpected argument".into()));
                }
            }
        }
    }
    match inspect_file {
        Some(file) => {
            p.inspect = Some(InspectRequest {
                file,
                from,
                to,
                save_selection,
            })
        }
        None if from.is_some() || to.is_some() || save_selection.is_some() => {
            return Err(invalid(
                "--from, --to and --save-selection only apply with --inspect".into(),
            ));
        }
        None => {}
    }
    Ok(p)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(CliExit::Help(msg)) => {
            eprintln!("{msg}");
            return Ok(());
        }
        Err(CliExit::Invalid(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    if let Some(req) = &parsed.inspect {
        logging::init(LogTarget::Stderr)?;
        return inspect::run(req, &mut std::io::stdout().lock());
    }

    let Some((rig_name, entry)) = resolve_rig(&parsed)? else {
        return Ok(());
    };
    let opts = RunOptions::for_rig(
        rig_name,
        &entry,
        parsed.output.clone(),
        parsed.duration,
        parsed.calibration.clone(),
    );

    if parsed.dry_run {
        print_summary(&opts, &entry);
        return Ok(());
    }

    if parsed.headless {
        logging::init(LogTarget::Stderr)?;
        let path = headless::run(&entry, &opts).await?;
        println!("{}", path.display());
        return Ok(());
    }

    logging::init(LogTarget::File(logging::log_path()))?;
    let mut app = App::new(&entry, opts);
    app.run().await
}

/// Picks the rig to run, persisting command-line rigs saved under a name.
fn resolve_rig(parsed: &ParsedArgs) -> anyhow::Result<Option<(String, RigEntry)>> {
    if parsed.demo || matches!(parsed.rig.as_deref(), Some("demo")) {
        return Ok(Some(("demo".into(), demo_rig())));
    }

    let rigs_file = load_rigs();
    let rig = parsed.rig_file.as_deref().map(load_rig_file).transpose()?;
    let req = RigRequest {
        rig_name: parsed.rig.clone(),
        rig,
    };

    let mut rigs_mut = rigs_file.clone();
    let resolved = match req.resolve(&rigs_file) {
        ResolveRig::Direct(entry) => {
            let name = match &parsed.rig {
                Some(name) => {
                    let overwrite = match rigs_mut.rigs.get(name) {
                        // New rig: save it right away
                        None => true,
                        Some(existing) if *existing != entry => {
                            parsed.save
                                || prompt_yes_no(&format!("Overwrite existing rig '{name}'? [y/N]: "))
                        }
                        Some(_) => false,
                    };
                    if overwrite {
                        rigs_mut.rigs.insert(name.clone(), entry.clone());
                        if let Err(e) = save_rigs(&rigs_mut) {
                            eprintln!("Could not save rig '{name}': {e}");
                        }
                    }
                    name.clone()
                }
                None => parsed
                    .rig_file
                    .as_deref()
                    .and_then(|p| p.file_stem())
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "rig".into()),
            };
            (name, entry)
        }
        ResolveRig::Loaded(entry) => (parsed.rig.clone().unwrap_or_default(), entry),
        ResolveRig::PromptSelect(mut names) => {
            // Always offer the demo rig
            if !names.iter().any(|n| n == "demo") {
                names.push("demo".into());
            }
            eprintln!("Select rig:");
            for (i, n) in names.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, n);
            }
            let line = prompt_string("Enter number (or blank to abort): ")?;
            let Some(name) = line
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|idx| idx.checked_sub(1))
                .and_then(|idx| names.get(idx))
            else {
                return Ok(None);
            };
            if name == "demo" {
                return Ok(Some(("demo".into(), demo_rig())));
            }
            match rigs_mut.rigs.get(name) {
                Some(entry) => (name.clone(), entry.clone()),
                None => return Ok(None),
            }
        }
        ResolveRig::Missing(name) => {
            bail!("rig '{name}' is not saved; pass a rig JSON file to create it")
        }
        ResolveRig::None => {
            eprintln!("No rig given and none saved; starting the demo rig.");
            ("demo".into(), demo_rig())
        }
    };
    Ok(Some(resolved))
}

fn print_summary(opts: &RunOptions, entry: &RigEntry) {
    println!("rig: {}", opts.rig_name);
    println!("output: {}", opts.output.display());
    if let Some(d) = opts.duration {
        println!("duration: {}s", d.as_secs_f64());
    }
    if let Some(c) = &opts.calibration {
        println!("calibration: {}", c.display());
    }
    println!("sensors:");
    let mut namer = SensorNamer::new();
    for spec in &entry.sensors {
        println!(
            "  {} ({}, every {} ms, window {} s)",
            namer.name_for(spec),
            spec.kind.label(),
            spec.data_interval_ms,
            spec.refresh_period_s
        );
    }
}

fn prompt_yes_no(prompt: &str) -> bool {
    match prompt_string(prompt) {
        Ok(line) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn prompt_string(prompt: &str) -> io::Result<String> {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}
