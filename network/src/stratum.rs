// Copyright (C) 2020-2023 The Strata Team
// This file is part of the strata library.

// The strata library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The strata library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the strata library. If not, see <https://www.gnu.org/licenses/>.

//! The miner-facing surface: job issuance and nonce submission.
//!
//! A promoted block re-enters consensus exactly like one heard from a peer:
//! staged, queued for serial integration, and gossiped to the sync peers.

use crate::{
    errors::NetworkError,
    message::{BlockTemplateParams, Envelope, SubmitParams},
    node::Node,
    stream::PeerStream,
};

use strata_consensus::{Blockchain, ProcessingItem, SubmitOutcome};

use serde_json::json;
use std::sync::Arc;

impl Node {
    pub(crate) fn on_block_template(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let params: BlockTemplateParams =
            serde_json::from_value(envelope.body()).unwrap_or(BlockTemplateParams {
                agent: String::new(),
            });
        let job = self.pool.block_template(&params.agent)?;
        stream.write_result("block_template", serde_json::to_value(&job)?, &envelope.id)
    }

    pub(crate) async fn on_submit(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let params: SubmitParams = serde_json::from_value(envelope.body())?;
        let Some(job) = self.pool.get_job(&params.job_id) else {
            stream.write_result("submit", json!({ "error": "unknown job" }), &envelope.id)?;
            return Ok(());
        };

        match self
            .pool
            .on_miner_nonce(&params.nonce, &job, &params.address)?
        {
            SubmitOutcome::Rejected => {
                stream.write_result("submit", json!({ "status": false }), &envelope.id)?;
            }
            SubmitOutcome::Share(receipt) => {
                stream.write_result("submit", serde_json::to_value(&receipt)?, &envelope.id)?;
            }
            SubmitOutcome::Block { receipt, block } => {
                info!("candidate submitted for index: {}", block.index);
                for transaction in &block.transactions {
                    debug!("  {}", transaction.transaction_signature);
                }

                let own_rid = self
                    .identity
                    .generate_rid(&self.identity.username_signature);
                self.consensus.insert_consensus_block(&block, &own_rid);
                self.queue
                    .add(ProcessingItem {
                        blockchain: Blockchain::from_block(block.clone()),
                        peer_rid: None,
                    })
                    .await;
                self.send_block_to_peers(&block, None);
                if let Err(error) = self.pool.refresh() {
                    warn!("pool refresh after promotion failed: {}", error);
                }

                stream.write_result("submit", serde_json::to_value(&receipt)?, &envelope.id)?;
            }
        }
        Ok(())
    }
}
