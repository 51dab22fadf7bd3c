//! Reassembles chunk outputs into the final ordered table.

use address_geocoder_models::{Chunk, EnrichedResult, GeocodeResult, OutputRow};

use crate::scheduler::ChunkOutput;

/// Orders `outputs` by chunk index and pairs every row with its record.
///
/// Chunks that never reported, or reported the wrong number of rows,
/// are replaced with failure rows so the table always has exactly one
/// row per record, in record order.
#[must_use]
pub fn assemble(chunks: &[Chunk], outputs: Vec<ChunkOutput>) -> Vec<OutputRow> {
    let mut slots: Vec<Option<Vec<EnrichedResult>>> = vec![None; chunks.len()];
    for (index, rows) in outputs {
        match slots.get_mut(index) {
            Some(slot) => *slot = Some(rows),
            None => log::error!("Discarding output for unknown chunk {index}"),
        }
    }

    let total = chunks.iter().map(|c| c.records.len()).sum();
    let mut table = Vec::with_capacity(total);

    for (chunk, slot) in chunks.iter().zip(slots) {
        let rows = match slot {
            Some(rows) if rows.len() == chunk.records.len() => rows,
            Some(rows) => {
                log::error!(
                    "Chunk {} returned {} rows for {} records, marking all as failed",
                    chunk.index,
                    rows.len(),
                    chunk.records.len()
                );
                failure_rows(chunk)
            }
            None => {
                log::error!(
                    "Chunk {} never completed, marking {} records as failed",
                    chunk.index,
                    chunk.records.len()
                );
                failure_rows(chunk)
            }
        };

        table.extend(chunk.records.iter().zip(rows).map(|(record, enriched)| OutputRow {
            id: record.id.clone(),
            enriched,
        }));
    }

    table
}

fn failure_rows(chunk: &Chunk) -> Vec<EnrichedResult> {
    chunk
        .records
        .iter()
        .map(|r| EnrichedResult::bare(GeocodeResult::unresolved(r.raw_address.as_str())))
        .collect()
}
