//! Outbound anti-entropy: periodic getDifference plus targeted getBlock.

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{absorb, CatchainReceiver};
use crate::domain::{CatchainResult, PeerId, ProtocolViolation, SourceId};
use crate::events::wire::{
    decode, encode, CatchainQuery, CatchainResponse, GET_BLOCK_QUERY, GET_DIFFERENCE_QUERY,
};
use crate::events::{Action, QueryContext};

impl CatchainReceiver {
    /// One sync round against a random trusted remote source.
    pub(super) fn synchronize(&mut self, out: &mut Vec<Action>) -> CatchainResult<()> {
        let count = self.sources.len() as SourceId;
        if count < 2 {
            return Ok(());
        }
        for _ in 0..self.config.max_sources_sync_attempts {
            let candidate = self.rng.gen_range(0..count);
            if candidate == self.local_id || self.sources[candidate as usize].is_blamed() {
                continue;
            }
            return self.synchronize_with(candidate, out);
        }
        trace!("[qc-18] no sync target this round");
        Ok(())
    }

    fn synchronize_with(&mut self, target: SourceId, out: &mut Vec<Action>) -> CatchainResult<()> {
        let to = self.sources[target as usize].address();
        let data = encode(&CatchainQuery::GetDifference {
            heights: self.height_vector(),
        })?;
        out.push(Action::SendQuery {
            to,
            name: GET_DIFFERENCE_QUERY,
            data,
            timeout: self.config.get_difference_timeout(),
            context: QueryContext::GetDifference,
        });

        // Most behind on delivery among sources with a known next block.
        let behind = self
            .sources
            .iter()
            .filter(|s| s.has_undelivered())
            .filter_map(|s| {
                let lag = s.received_height() - s.delivered_height();
                s.first_undelivered().map(|start| (lag, start))
            })
            .max_by_key(|(lag, _)| *lag);
        let Some((lag, start)) = behind else {
            return Ok(());
        };

        let missing = self
            .dag
            .missing_dependencies(start, self.config.max_pending_deps_fetch);
        if !missing.is_empty() {
            debug!(
                target,
                lag,
                fetches = missing.len(),
                "[qc-18] fetching missing dependencies"
            );
        }
        for hash in missing {
            out.push(Action::SendQuery {
                to,
                name: GET_BLOCK_QUERY,
                data: encode(&CatchainQuery::GetBlock { hash })?,
                timeout: self.config.get_block_timeout(),
                context: QueryContext::GetBlock { hash },
            });
        }
        Ok(())
    }

    pub(super) fn on_query_completed(
        &mut self,
        peer: PeerId,
        context: QueryContext,
        result: Result<Vec<u8>, String>,
        now: Instant,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        let Some(source) = self.source_of_peer(&peer) else {
            return Ok(());
        };
        let data = match result {
            Ok(data) => data,
            Err(reason) => {
                debug!(source, ?context, %reason, "[qc-18] query failed");
                return Ok(());
            }
        };

        let limit = self.wire_limit();
        let result = decode::<CatchainResponse>(&data, limit)
            .map_err(Into::into)
            .and_then(|response| match (context, response) {
                (QueryContext::GetDifference, CatchainResponse::Difference { heights }) => {
                    trace!(source, ?heights, "[qc-18] difference received");
                    Ok(())
                }
                (QueryContext::GetDifference, CatchainResponse::ForkProof(proof)) => {
                    self.accept_fork_proof(proof, out)
                }
                (QueryContext::GetBlock { hash }, CatchainResponse::BlockResult(block)) => {
                    if block.hash() != hash {
                        return Err(ProtocolViolation::UnexpectedResponse.into());
                    }
                    self.receive_block(source, block, now, out)
                }
                (QueryContext::GetBlock { hash }, CatchainResponse::BlockNotFound { .. }) => {
                    debug!(source, hash = %hex::encode(&hash[..8]), "[qc-18] peer lacks block");
                    Ok(())
                }
                _ => Err(ProtocolViolation::UnexpectedResponse.into()),
            });
        absorb(result, "query response")
    }
}
