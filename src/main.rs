//! numa-affinity CLI - NUMA-Aware Process Affinity Manager
//!
//! Inspects topology, recommends CPU sets, manages rules and keeps them
//! applied to running processes.

use clap::Parser;
use numa_affinity::affinity::{
    classify_mask, detect_core_collisions, format_cpu_list, parse_cpu_list, parse_mask_text,
};
use numa_affinity::config::{AppConfig, CliArgs, Commands, OutputFormat, RulesCommand, SaveMode};
use numa_affinity::error::{AffinityError, Result};
use numa_affinity::policy::{node_loads, recommend_for_name, recommend_for_process, ApplyPlan, Recommendation};
use numa_affinity::reconcile::{run_pass, Reconciler};
use numa_affinity::rules::{export_to_file, import_from_file, normalize_process_name, RuleStore};
use numa_affinity::system::{native_platform, snapshot_processes, Platform, ProcessRecord, ProcessorTopology};
use serde::Serialize;
use std::io::{BufRead, IsTerminal, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_logging(args.verbose, args.log_json);

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run(args: CliArgs) -> Result<()> {
    let config = AppConfig::from_cli(&args)?;
    if args.verbose > 0 {
        print_config(&config);
    }

    let platform = native_platform();
    let store = RuleStore::with_defaults(&config.rules_file, &config.machine_root, &config.user_root);

    handle_command(&args, &config, platform, store)
}

fn handle_command(args: &CliArgs, config: &AppConfig, platform: Arc<dyn Platform>, store: RuleStore) -> Result<()> {
    let format = args.format;
    match &args.command {
        Commands::Topology => cmd_topology(platform.as_ref(), format),
        Commands::Processes { filter } => cmd_processes(platform.as_ref(), filter.as_deref(), format),
        Commands::Classify { pid, mask } => cmd_classify(platform.as_ref(), *pid, mask.as_deref(), format),
        Commands::Collisions { cpus } => cmd_collisions(platform.as_ref(), config, cpus),
        Commands::Recommend { name, pid } => {
            cmd_recommend(platform.as_ref(), config, name.as_deref(), *pid, format)
        }
        Commands::Apply {
            pid,
            cpus,
            mask,
            recommended,
            yes,
            save,
        } => cmd_apply(
            platform.as_ref(),
            &store,
            config,
            *pid,
            Selection {
                cpus: cpus.as_deref(),
                mask: mask.as_deref(),
                recommended: *recommended,
            },
            *yes,
            *save,
        ),
        Commands::Rules { action } => cmd_rules(&store, action, format),
        Commands::Reconcile => cmd_reconcile(platform.as_ref(), &store, format),
        Commands::Watch { .. } => cmd_watch(platform, store, config),
    }
}

fn print_config(config: &AppConfig) {
    println!("=== Configuration ===");
    println!("Rule table:       {}", config.rules_file.display());
    println!("Machine scope:    {}", config.machine_root.display());
    println!("User scope:       {}", config.user_root.display());
    println!("Interval:         {}", humantime::format_duration(config.interval));
    match config.threads_per_core {
        Some(threads) => println!("Threads per core: {}", threads),
        None => println!("Threads per core: from topology"),
    }
    println!();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(question: &str) -> bool {
    if !std::io::stdin().is_terminal() {
        return false;
    }
    print!("{} [y/N] ", question);
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn find_process(snapshot: &[ProcessRecord], pid: u32) -> Result<&ProcessRecord> {
    snapshot
        .iter()
        .find(|p| p.pid == pid)
        .ok_or(AffinityError::ProcessNotFound(pid))
}

fn cmd_topology(platform: &dyn Platform, format: OutputFormat) -> Result<()> {
    let topology = ProcessorTopology::discover(platform);
    match format {
        OutputFormat::Json => print_json(&topology),
        OutputFormat::Text => {
            topology.print_summary();
            Ok(())
        }
    }
}

fn cmd_processes(platform: &dyn Platform, filter: Option<&str>, format: OutputFormat) -> Result<()> {
    let filter = filter.map(str::to_lowercase);
    let processes: Vec<ProcessRecord> = snapshot_processes(platform)?
        .into_iter()
        .filter(|p| filter.as_deref().map_or(true, |f| p.name.to_lowercase().contains(f)))
        .collect();

    if format == OutputFormat::Json {
        return print_json(&processes);
    }

    println!("{:>8} {:>8}  {:<24} {:>18}  CPUS", "PID", "SESSION", "NAME", "MASK");
    for p in &processes {
        println!(
            "{:>8} {:>8}  {:<24} {:>18}  {}",
            p.pid,
            p.session_id,
            p.name,
            p.current_affinity.to_string(),
            format_cpu_list(&p.current_affinity.cpu_ids())
        );
    }
    println!("\n{} processes", processes.len());
    Ok(())
}

fn cmd_classify(platform: &dyn Platform, pid: Option<u32>, mask: Option<&str>, format: OutputFormat) -> Result<()> {
    let topology = ProcessorTopology::discover(platform);
    let mask = match (pid, mask) {
        (_, Some(text)) => parse_mask_text(text)?,
        (Some(pid), None) => platform.get_affinity(pid)?,
        (None, None) => return Err(AffinityError::config("a process ID or --mask is required")),
    };

    let classification = classify_mask(mask, &topology);
    if format == OutputFormat::Json {
        return print_json(&classification);
    }

    println!("Mask:           {}", mask);
    println!("CPUs:           {}", format_cpu_list(&mask.cpu_ids()));
    println!("Origin:         {}", classification.source);
    println!("Recommendation: {}", classification.recommendation);
    Ok(())
}

fn cmd_collisions(platform: &dyn Platform, config: &AppConfig, cpus: &str) -> Result<()> {
    let ids = parse_cpu_list(cpus);
    if ids.is_empty() {
        return Err(AffinityError::format(cpus, "no CPU ids in list"));
    }

    let topology = ProcessorTopology::discover(platform);
    let collisions = detect_core_collisions(&ids, config.threads_per_core_for(&topology));
    if collisions.has_collisions() {
        println!("Warning: {}", collisions.warning());
    } else {
        println!("No shared physical cores in {}", format_cpu_list(&ids));
    }
    Ok(())
}

fn print_recommendation(recommendation: &Recommendation, loads: &[(usize, usize)], threads_per_core: usize) {
    println!("Workload:   {}", recommendation.workload.name());
    match recommendation.node_id {
        Some(node) => println!("NUMA node:  {} ({:?})", node, recommendation.reason),
        None => println!("NUMA node:  none"),
    }
    println!("CPUs:       {}", format_cpu_list(&recommendation.cpus));

    let collisions = detect_core_collisions(&recommendation.cpus, threads_per_core);
    if collisions.has_collisions() {
        println!("Warning:    {}", collisions.warning());
    }
    if loads.len() > 1 {
        println!("Peer CPU load per node:");
        for (node, load) in loads {
            println!("  Node {}: {}", node, load);
        }
    }
}

fn cmd_recommend(
    platform: &dyn Platform,
    config: &AppConfig,
    name: Option<&str>,
    pid: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let topology = ProcessorTopology::discover(platform);
    let snapshot = snapshot_processes(platform)?;

    let (recommendation, key) = match (pid, name) {
        (Some(pid), _) => {
            let target = find_process(&snapshot, pid)?;
            (recommend_for_process(&topology, target, &snapshot), target.normalized_name())
        }
        (None, Some(name)) => (recommend_for_name(&topology, name, &snapshot), normalize_process_name(name)),
        (None, None) => return Err(AffinityError::config("a process name or --pid is required")),
    };

    if format == OutputFormat::Json {
        return print_json(&recommendation);
    }

    let peers: Vec<ProcessRecord> = snapshot.iter().filter(|p| p.normalized_name() == key).cloned().collect();
    print_recommendation(
        &recommendation,
        &node_loads(&topology, &peers),
        config.threads_per_core_for(&topology),
    );
    if let Some(pid) = pid {
        let current = find_process(&snapshot, pid)?.current_affinity;
        let impact = numa_affinity::affinity::estimate_impact(current, recommendation.cpus.len());
        println!("Impact:     {} (risk: {:?})", impact.expected, impact.risk);
    }
    Ok(())
}

struct Selection<'a> {
    cpus: Option<&'a str>,
    mask: Option<&'a str>,
    recommended: bool,
}

fn cmd_apply(
    platform: &dyn Platform,
    store: &RuleStore,
    config: &AppConfig,
    pid: u32,
    selection: Selection<'_>,
    yes: bool,
    save: SaveMode,
) -> Result<()> {
    let topology = ProcessorTopology::discover(platform);
    let snapshot = snapshot_processes(platform)?;
    let target = find_process(&snapshot, pid)?;

    let cpus = match (selection.cpus, selection.mask, selection.recommended) {
        (Some(list), _, _) => parse_cpu_list(list),
        (None, Some(text), _) => parse_mask_text(text)?.cpu_ids(),
        (None, None, true) => recommend_for_process(&topology, target, &snapshot).cpus,
        (None, None, false) => {
            return Err(AffinityError::config("one of --cpus, --mask or --recommended is required"))
        }
    };

    let plan = ApplyPlan::prepare(&cpus, &topology, config.threads_per_core_for(&topology))?;
    plan.print_summary();

    let impact = plan.impact(target.current_affinity);
    println!("  Current: {} ({} CPUs)", target.current_affinity, target.current_affinity.count());
    println!("  Impact:  {} (risk: {:?})", impact.expected, impact.risk);

    let confirmed = yes || (plan.requires_confirmation() && confirm("Apply despite shared physical cores?"));
    let outcome = plan.apply(platform, pid, confirmed)?;
    println!("\nApplied {} to {} (PID {})", outcome.applied, target.name, pid);

    if let Some(report) = plan.save(store, &target.name, save.into())? {
        println!("Saved to: {}", report.written.join(", "));
        if !report.is_complete() {
            println!("Some scopes were not updated:");
        }
        for failure in &report.failed {
            println!("Not saved to {}: {}", failure.scope, failure.message);
        }
    } else if save == SaveMode::Table {
        println!("Saved to rule table");
    }
    Ok(())
}

fn cmd_rules(store: &RuleStore, action: &RulesCommand, format: OutputFormat) -> Result<()> {
    match action {
        RulesCommand::List => {
            let rules = store.list();
            if format == OutputFormat::Json {
                return print_json(&rules);
            }
            println!("{:<24} {:>18}  {:<12} CPUS", "PROCESS", "MASK", "SOURCE");
            for rule in &rules {
                println!(
                    "{:<24} {:>18}  {:<12} {}",
                    rule.process_name,
                    rule.mask.to_string(),
                    rule.source,
                    format_cpu_list(&rule.mask.cpu_ids())
                );
            }
            println!("\n{} rules", rules.len());
        }
        RulesCommand::Get { name } => match store.get(name) {
            Some(rule) if format == OutputFormat::Json => print_json(&rule)?,
            Some(rule) => println!(
                "{} = {} (CPUs {}, from {})",
                rule.process_name,
                rule.mask,
                format_cpu_list(&rule.mask.cpu_ids()),
                rule.source
            ),
            None => println!("No rule for {}", name),
        },
        RulesCommand::Set { name, mask, table } => {
            let mask = parse_mask_text(mask)?;
            if mask.is_empty() {
                return Err(AffinityError::EmptySelection);
            }
            if *table {
                store.save_to_table(name, mask)?;
                println!("Saved {} = {} to rule table", name, mask);
            } else {
                let report = store.save_permanent(name, mask)?;
                println!("Saved {} = {} to {}", name, mask, report.written.join(", "));
                for failure in &report.failed {
                    println!("Not saved to {}: {}", failure.scope, failure.message);
                }
            }
        }
        RulesCommand::Delete { name } => {
            let removed = store.delete(name)?;
            println!("Removed {} from {} scopes", name, removed);
        }
        RulesCommand::Clear { yes } => {
            if !*yes && !confirm("Delete every rule from the machine and user scopes?") {
                println!("Aborted");
                return Ok(());
            }
            let removed = store.delete_all()?;
            println!("Removed {} rules", removed);
        }
        RulesCommand::Export { path } => {
            let count = export_to_file(store, path)?;
            println!("Exported {} rules to {}", count, path.display());
        }
        RulesCommand::Import { path } => {
            let report = import_from_file(store, path)?;
            println!("Imported {} rules", report.imported.len());
            for (name, error) in &report.failed {
                println!("  Skipped {}: {}", name, error);
            }
        }
    }
    Ok(())
}

fn cmd_reconcile(platform: &dyn Platform, store: &RuleStore, format: OutputFormat) -> Result<()> {
    let report = run_pass(platform, store)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "examined": report.examined,
            "matched": report.matched,
            "applied": report.applied,
            "unchanged": report.unchanged,
            "failed": report.failed,
            "duration_ms": report.duration.as_millis() as u64,
        })),
        OutputFormat::Text => {
            report.print_summary();
            Ok(())
        }
    }
}

fn cmd_watch(platform: Arc<dyn Platform>, store: RuleStore, config: &AppConfig) -> Result<()> {
    let reconciler = Reconciler::new(platform, Arc::new(store));
    let interval = config.interval;

    println!("Keeping affinity rules applied every {}", humantime::format_duration(interval));
    println!("Press Ctrl+C to stop.\n");

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| AffinityError::config(format!("Failed to create runtime: {}", e)))?;

    let stats = rt.block_on(async {
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => shutdown.cancel(),
                Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C"),
            }
        });

        reconciler.run(interval, cancel).await
    });

    println!(
        "\nStopped after {} passes ({} masks applied, {} skipped, {} aborted)",
        stats.passes, stats.applied, stats.skipped, stats.aborted
    );
    Ok(())
}
