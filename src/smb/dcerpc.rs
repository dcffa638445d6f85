/* Copyright (C) 2020 Open Information Security Foundation
 *
 * You can copy, redistribute or modify this Program under the terms of
 * the GNU General Public License version 2 as published by the Free
 * Software Foundation.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * version 2 along with this program; if not, write to the Free Software
 * Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA
 * 02110-1301, USA.
 */

//! Seam to the DCE/RPC analyzer fed with reassembled named pipe payloads.

use log::{debug, warn};

use crate::smb::smb::{SmbState, SmbStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

/// The downstream DCE/RPC payload analyzer. It is call and return: it
/// never calls back into the SMB engine. Returns false when the payload
/// could not be processed.
pub trait DcerpcAnalyzer {
    fn process_request(&mut self, data: &[u8]) -> bool;
    fn process_response(&mut self, data: &[u8]) -> bool;
}

/// Drops everything; for embedders that only want file tracking and
/// alerts.
#[derive(Debug, Default)]
pub struct NullDcerpc;

impl DcerpcAnalyzer for NullDcerpc {
    fn process_request(&mut self, data: &[u8]) -> bool {
        debug!("discarding {} request bytes", data.len());
        true
    }

    fn process_response(&mut self, data: &[u8]) -> bool {
        debug!("discarding {} response bytes", data.len());
        true
    }
}

/// A reassembled transaction payload repacked for downstream analysis.
#[derive(Debug)]
pub struct TransRpkt {
    data: Vec<u8>,
    pub direction: Direction,
}

impl TransRpkt {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn dsize(&self) -> u32 {
        self.data.len() as u32
    }
}

impl SmbState {
    /// Run `f` with a reassembly packet wrapping `data`. The session has
    /// one packet slot; the slot is held for exactly the duration of `f`
    /// and freed again on every exit path. Asking for a second packet
    /// while one is live is an error.
    pub fn with_rpkt<F>(&mut self, data: Vec<u8>, direction: Direction, f: F) -> SmbStatus
    where
        F: FnOnce(&mut SmbState, &TransRpkt) -> SmbStatus,
    {
        if self.rpkt_busy {
            warn!("reassembly packet slot already in use");
            return SmbStatus::Error;
        }
        self.rpkt_busy = true;
        let rpkt = TransRpkt { data, direction };
        let status = f(self, &rpkt);
        self.rpkt_busy = false;
        status
    }
}
