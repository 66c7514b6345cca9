// Metric descriptions for the relaylock server
// No exporter is installed here; an embedding application may install a recorder.

use metrics::{describe_counter, describe_gauge};

/// Register metric descriptions; call once at startup
pub fn init_metrics() {
    describe_gauge!("relaylock_locks_held", "Number of unexpired local locks");
    describe_gauge!(
        "relaylock_lock_queue_depth",
        "Number of acquire requests waiting for a lock"
    );
    describe_counter!("relaylock_lock_grants_total", "Total number of local lock grants");
    describe_gauge!("relaylock_relays_connected", "Number of live relay links");
    describe_gauge!(
        "relaylock_quorum_available",
        "1 when enough relays are connected to reach quorum"
    );
    describe_counter!(
        "relaylock_agreement_phase_total",
        "Agreement phases run, labelled by phase and outcome"
    );
    describe_counter!(
        "relaylock_client_acquisitions_total",
        "Client lock requests, labelled by outcome"
    );
}
