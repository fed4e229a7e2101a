//! Serving peers: getBlock, getDifference and pass-through traffic.

use tracing::{debug, trace};

use super::CatchainReceiver;
use crate::domain::{
    compute_send_quota, BlockHash, CatchainError, CatchainResult, Height, PeerId,
    ProtocolViolation, SourceId,
};
use crate::events::wire::{decode, encode, CatchainMessage, CatchainQuery, CatchainResponse};
use crate::events::{Action, QueryId};

impl CatchainReceiver {
    /// Overlay broadcasts are not DAG traffic; hand them to the listener.
    pub(super) fn on_broadcast(&mut self, from: PeerId, data: Vec<u8>, out: &mut Vec<Action>) {
        let Some(source) = self.source_of_peer(&from) else {
            debug!("[qc-18] broadcast from unknown peer dropped");
            return;
        };
        out.push(Action::NotifyBroadcast {
            source: self.sources[source as usize].key_hash(),
            data,
        });
    }

    pub(super) fn on_query(
        &mut self,
        from: PeerId,
        data: Vec<u8>,
        query_id: QueryId,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        if !self.is_booted() {
            out.push(Action::Reply {
                query_id,
                result: Err("catchain not ready".into()),
            });
            return Ok(());
        }
        let Some(peer) = self.source_of_peer(&from) else {
            out.push(Action::Reply {
                query_id,
                result: Err(ProtocolViolation::UnknownPeer.to_string()),
            });
            return Ok(());
        };

        let query = match decode::<CatchainQuery>(&data, self.wire_limit()) {
            Ok(query) => query,
            Err(_) => {
                out.push(Action::CustomQuery {
                    source: self.sources[peer as usize].key_hash(),
                    data,
                    query_id,
                });
                return Ok(());
            }
        };

        let response = match query {
            CatchainQuery::GetBlock { hash } => Ok(self.process_get_block(hash)),
            CatchainQuery::GetDifference { heights } => {
                self.process_get_difference(peer, &heights, out)
            }
        };
        let result = match response {
            Ok(response) => Ok(encode(&response)?),
            Err(CatchainError::Violation(violation)) => {
                debug!(%violation, peer, "[qc-18] query rejected");
                Err(violation.to_string())
            }
            Err(fatal) => return Err(fatal),
        };
        out.push(Action::Reply { query_id, result });
        Ok(())
    }

    fn process_get_block(&self, hash: BlockHash) -> CatchainResponse {
        match self.dag.get_by_hash(&hash) {
            Some(record) if record.initialized && !record.is_root() => match &record.block {
                Some(block) => CatchainResponse::BlockResult(block.clone()),
                None => CatchainResponse::BlockNotFound { hash },
            },
            _ => CatchainResponse::BlockNotFound { hash },
        }
    }

    /// Answer a height vector: fork evidence first, otherwise push what the
    /// requester lacks (bounded per response) and reply with our heights.
    fn process_get_difference(
        &mut self,
        peer: SourceId,
        claimed: &[Option<Height>],
        out: &mut Vec<Action>,
    ) -> CatchainResult<CatchainResponse> {
        if claimed.len() != self.sources.len() {
            return Err(ProtocolViolation::HeightVectorLength {
                got: claimed.len(),
                expected: self.sources.len(),
            }
            .into());
        }

        for (source, entry) in self.sources.iter().zip(claimed) {
            if let (Some(_), Some(proof)) = (entry, source.fork_proof()) {
                debug!(
                    peer,
                    source = source.id(),
                    "[qc-18] answering getDifference with fork proof"
                );
                return Ok(CatchainResponse::ForkProof(proof.clone()));
            }
        }

        // Own blocks are delivered before they leave a node, so a peer behind
        // on its own chain has lost its store.
        let own = &self.sources[peer as usize];
        if claimed[peer as usize].is_some_and(|height| height < own.delivered_height()) {
            debug!(peer, "[qc-18] peer lost its own chain, resetting its filter");
            self.knowledge[peer as usize].clear();
        }

        let gaps: Vec<Height> = self
            .sources
            .iter()
            .zip(claimed)
            .map(|(source, entry)| match entry {
                Some(height) => source.delivered_height().saturating_sub(*height),
                None => 0,
            })
            .collect();
        let quota = compute_send_quota(&gaps, self.config.max_blocks_to_send);
        // Leftover budget: one extra block each for the first sources still
        // lagging past the quota. Keeps a zero quota from stalling catch-up.
        let capped: Height = gaps.iter().map(|gap| (*gap).min(quota)).sum();
        let mut spare = (self.config.max_blocks_to_send as Height).saturating_sub(capped);

        let mut sent = 0usize;
        let address = self.sources[peer as usize].address();
        for (id, gap) in gaps.iter().enumerate() {
            let Some(from_height) = claimed[id].filter(|_| *gap > 0) else {
                continue;
            };
            let mut take = (*gap).min(quota);
            if take < *gap && spare > 0 {
                take += 1;
                spare -= 1;
            }
            for height in from_height + 1..=from_height + take {
                let Some(index) = self.sources[id].block_at(height) else {
                    break;
                };
                let record = self.dag.get(index);
                let Some(block) = record.block.as_ref() else {
                    break;
                };
                if self.knowledge[peer as usize].contains(&record.hash) {
                    continue;
                }
                let data = encode(&CatchainMessage::BlockUpdate(block.clone()))?;
                out.push(Action::SendMessage { to: address, data });
                sent += 1;
            }
        }
        trace!(peer, quota, sent, "[qc-18] getDifference served");

        Ok(CatchainResponse::Difference {
            heights: self.height_vector(),
        })
    }
}
