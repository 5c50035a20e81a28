use flow_monitor::{FlowClassifier, FlowId, FlowStats};
use std::collections::BTreeMap;

const DISPLAY_MAX_ERRORS: usize = 10;

/// Bits in a binary megabit
const BITS_PER_MBIT: f64 = 1024.0 * 1024.0;

/// Formats a bit rate in binary megabits per second (1 Mbit = 1024 * 1024 bits)
fn format_throughput(bps: f64) -> String {
    format!("{:.4} Mbps (binary, 2^20 bit)", bps / BITS_PER_MBIT)
}

pub fn print_flow_stats(stats_by_flow: &BTreeMap<FlowId, FlowStats>, classifier: &FlowClassifier) {
    println!("--- Flow stats ---");
    for (flow_id, stats) in stats_by_flow {
        match classifier.find_flow(*flow_id) {
            Some(key) => println!("* Flow {flow_id} ({key})"),
            None => println!("* Flow {flow_id}"),
        }

        println!(
            "  * Tx: {} bytes ({} packets)",
            stats.tx.bytes, stats.tx.packets
        );
        println!(
            "  * Rx: {} bytes ({} packets)",
            stats.rx.bytes, stats.rx.packets
        );
        match stats.throughput_bps() {
            Some(bps) => println!("  * Throughput: {}", format_throughput(bps)),
            None => println!("  * Throughput: n/a"),
        }
        println!(
            "  * Delay sum: {:.6}s (mean {:.6}s)",
            stats.delay_sum,
            stats.mean_delay()
        );
        println!(
            "  * Jitter sum: {:.6}s (mean {:.6}s)",
            stats.jitter_sum,
            stats.mean_jitter()
        );
        println!("  * Lost packets: {}", stats.lost_packets);
        if stats.times_forwarded > 0 {
            println!("    | {} forwards observed", stats.times_forwarded);
        }

        let unresolved = stats.unresolved_packets();
        if unresolved > 0 {
            println!("    | {unresolved} packets still in flight");
        }
        if stats.saturated {
            println!("    | some counters saturated, totals are lower bounds");
        }
    }
}

pub fn print_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }

    print!("--- Errors");
    if errors.len() > DISPLAY_MAX_ERRORS {
        print!(" (showing {DISPLAY_MAX_ERRORS} of {})", errors.len());
    }
    println!(" ---");

    for error in errors.iter().take(DISPLAY_MAX_ERRORS) {
        println!("* {error}");
    }
}
