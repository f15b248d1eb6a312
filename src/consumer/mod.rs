//! The twin consumer loops.
//!
//! The live consumer reads new entries with a blocking group read; the
//! pending consumer reclaims entries whose handlers went silent for
//! longer than the ack timeout. Both decode raw records and hand batches
//! to the processor; neither ever surfaces an error to the supervisor.

pub(crate) mod live;
pub(crate) mod pending;

use tracing::error;

use crate::codec;
use crate::event::Event;
use crate::log::RawRecord;

/// Decode a batch, skipping records that fail to parse.
///
/// A skipped record is deliberately not acknowledged: it stays pending so
/// the reclaim path keeps surfacing it while an operator investigates.
pub(crate) fn decode_records(stream: &str, records: Vec<RawRecord>) -> Vec<Event> {
    records
        .iter()
        .filter_map(|record| match codec::decode(stream, record) {
            Ok(event) => Some(event),
            Err(e) => {
                error!(stream = %stream, id = %record.id, error = %e, "undecodable record skipped");
                None
            }
        })
        .collect()
}
