use crate::config::cli::CliOpt;
use crate::util::{print_errors, print_flow_stats};
use anyhow::{Context, bail};
use flow_monitor::event::MonitorEvents;
use flow_monitor::observer::recorder::StepRecorder;
use flow_monitor::observer::verifier::VerifiedReplay;
use flow_monitor::observer::{FlowObserver, LogObserver};
use flow_monitor::{FlowMonitor, FlowStats, FlowId, MonitorConfig};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

/// Feeds the events through a fresh monitor, then stores and prints the results
pub fn run_and_report_stats(
    cli_opt: &CliOpt,
    config: MonitorConfig,
    events: MonitorEvents,
) -> anyhow::Result<()> {
    let recorder = Arc::new(StepRecorder::new());
    let mut observers: Vec<Arc<dyn FlowObserver>> = vec![recorder.clone()];
    if cli_opt.log_packets {
        observers.push(Arc::new(LogObserver));
    }

    let monitor = FlowMonitor::with_observers(config.clone(), observers)
        .context("invalid monitor config")?;

    println!("--- Monitor ---");
    println!("* Max delay: {:.3}s", config.max_delay.as_secs_f64());
    println!("* Sweep interval: {:.3}s", config.sweep_interval.as_secs_f64());
    println!("* Events: {}", events.len());

    let start = events
        .iter()
        .next()
        .map(|e| e.relative_time)
        .unwrap_or_default();
    let end = events.end_time().unwrap_or_default();

    monitor.start(start);
    let mut rejected = 0;
    for event in events.iter() {
        // Rejected events are recorded in the replay log and reported below
        if monitor.process(event).is_err() {
            rejected += 1;
        }
    }
    monitor.stop();
    tracing::info!(rejected, end = end.as_secs_f64(), "all events processed");

    if !cli_opt.no_final_sweep {
        let lost = monitor.terminal_sweep(end);
        println!(
            "* Terminal sweep at {:.3}s: {} packets declared lost",
            end.as_secs_f64(),
            lost.len()
        );
    }

    println!("--- Replay log ---");
    let json_steps = serde_json::to_vec_pretty(&recorder.steps())?;
    fs::write(&cli_opt.replay_log, json_steps).context("failed to store replay log")?;
    println!(
        "* Replay log available at {}",
        cli_opt.replay_log.display()
    );

    println!("--- Flow report ---");
    let report = monitor.report(cli_opt.histograms);
    fs::write(&cli_opt.report, report.to_json_pretty()?).context("failed to store flow report")?;
    println!("* Flow report available at {}", cli_opt.report.display());

    let stats_by_flow = monitor.snapshot_all();
    let verified = recorder
        .verifier()
        .verify()
        .context("failed to verify replay log")?;
    check_replay_matches_stats(&verified, &stats_by_flow)?;

    print_flow_stats(&stats_by_flow, monitor.classifier());
    print_errors(&verified.rejected_events);

    Ok(())
}

fn check_replay_matches_stats(
    verified: &VerifiedReplay,
    stats_by_flow: &BTreeMap<FlowId, FlowStats>,
) -> anyhow::Result<()> {
    for (flow_id, replayed) in &verified.stats_by_flow {
        let Some(stats) = stats_by_flow.get(flow_id) else {
            bail!("flow {flow_id} appears in the replay log but has no statistics");
        };

        if replayed.tx != stats.tx || replayed.rx != stats.rx {
            bail!("the replay log and the statistics of flow {flow_id} disagree on tx/rx counts");
        }

        if replayed.lost.packets != stats.lost_packets {
            bail!(
                "flow {flow_id} lost {} packets according to the replay log, but {} according to its statistics",
                replayed.lost.packets,
                stats.lost_packets
            );
        }
    }

    Ok(())
}
