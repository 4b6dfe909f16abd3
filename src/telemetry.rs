use metrics::describe_counter;
use once_cell::sync::OnceCell;

/// Registers descriptions for every counter the crate emits. Safe to call
/// more than once; only the first call does anything.
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scrape_attempts_total", "HTTP attempts made for article pages.");
        describe_counter!(
            "scrape_cache_hits_total",
            "Scrapes answered from the content cache."
        );
        describe_counter!(
            "scrape_failures_total",
            "Scrapes that ended in an error after retries."
        );
        describe_counter!(
            "content_validation_errors_total",
            "Content records rejected by validation, by field."
        );
        describe_counter!("bus_published_total", "Messages acknowledged by the log, by topic.");
        describe_counter!(
            "bus_publish_errors_total",
            "Messages the log failed to acknowledge, by topic."
        );
        describe_counter!("bus_consumed_total", "Messages received by the consumer, by topic.");
        describe_counter!(
            "bus_decode_errors_total",
            "Consumed messages skipped as undecodable, by topic."
        );
    });
}
