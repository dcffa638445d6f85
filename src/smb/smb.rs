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

//! Session state for SMB1 transaction inspection.

use std::collections::{HashMap, HashSet};

use crate::smb::buffer::{AppendMode, FragBuf};
use crate::smb::dcerpc::{DcerpcAnalyzer, NullDcerpc};
use crate::smb::events::SmbEvent;
use crate::smb::files::{FileKey, FileTracker};

pub const SMB1_COMMAND_TRANS: u8 = 0x25;
pub const SMB1_COMMAND_TRANS_SECONDARY: u8 = 0x26;
pub const SMB1_COMMAND_TRANS2: u8 = 0x32;
pub const SMB1_COMMAND_TRANS2_SECONDARY: u8 = 0x33;
pub const SMB1_COMMAND_NT_TRANS: u8 = 0xa0;
pub const SMB1_COMMAND_NT_TRANS_SECONDARY: u8 = 0xa1;

pub const SMB_FLAGS2_UNICODE: u16 = 0x8000;

/// An interim response acknowledges a partial primary request: word count
/// zero, so just the word count byte plus the byte count.
pub const SMB_COM_SIZE_INTERIM_RESP: u16 = 3;

/// Default bound on file name lengths accepted from the wire.
pub const SMB_MAX_PATH_LEN: u32 = 4096;

/// What the six entry points report back to the outer command
/// dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmbStatus {
    /// Processing went fine; keep tracking this transaction.
    Success,
    /// Structural violation; stop processing the transaction and retire
    /// the tracker. Never tears down the session.
    Error,
    /// Not interesting or invalid in a harmless way; don't track the
    /// response.
    Ignore,
}

/// Internal disposition of one fragment, the entry points fold `Full`
/// into the handler invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransStatus {
    Success,
    Full,
    Error,
    Ignore,
}

impl TransStatus {
    pub(crate) fn into_smb_status(self) -> SmbStatus {
        match self {
            TransStatus::Error => SmbStatus::Error,
            TransStatus::Ignore => SmbStatus::Ignore,
            _ => SmbStatus::Success,
        }
    }
}

/// Server flavor the monitored endpoint speaks. The two implementations
/// disagree observably on transaction reassembly; dispatch is always on
/// this explicit enum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SmbPolicy {
    #[default]
    Windows,
    Samba,
}

impl SmbPolicy {
    pub fn is_windows(self) -> bool {
        self == SmbPolicy::Windows
    }

    pub fn is_samba(self) -> bool {
        self == SmbPolicy::Samba
    }

    pub(crate) fn append_mode(self) -> AppendMode {
        match self {
            SmbPolicy::Windows => AppendMode::Strict,
            SmbPolicy::Samba => AppendMode::Lenient,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SmbConfig {
    pub policy: SmbPolicy,
    pub max_path_len: u32,
}

impl Default for SmbConfig {
    fn default() -> SmbConfig {
        SmbConfig {
            policy: SmbPolicy::Windows,
            max_path_len: SMB_MAX_PATH_LEN,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
}

/// What the outer command dispatcher already knows about the PDU it hands
/// us: command code, word/byte counts, the size of the fixed command
/// header and whether upstream structural checks passed.
#[derive(Clone, Debug)]
pub struct ComInfo {
    pub smb_com: u8,
    pub word_count: u8,
    pub byte_count: u16,
    pub com_size: u16,
    pub msg_type: MessageType,
    pub can_process: bool,
}

impl ComInfo {
    pub fn new(smb_com: u8, msg_type: MessageType, word_count: u8, byte_count: u16) -> ComInfo {
        ComInfo {
            smb_com,
            word_count,
            byte_count,
            com_size: 1 + 2 * word_count as u16 + 2,
            msg_type,
            can_process: true,
        }
    }

    pub fn is_request(&self) -> bool {
        self.msg_type == MessageType::Request
    }

    pub fn is_response(&self) -> bool {
        self.msg_type == MessageType::Response
    }

    pub fn can_process(&self) -> bool {
        self.can_process
    }
}

/// The SMB header fields this engine consumes. The header itself is
/// parsed by the outer dispatcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct SmbNtHdr {
    pub flags2: u16,
    pub uid: u16,
    pub tid: u16,
}

impl SmbNtHdr {
    pub fn is_unicode(&self) -> bool {
        self.flags2 & SMB_FLAGS2_UNICODE != 0
    }
}

/// Which side of the conversation the tracker is currently assembling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransSide {
    #[default]
    None,
    Request,
    Response,
}

/// Reassembly state for one in flight transaction.
#[derive(Debug, Default)]
pub struct TransactionTracker {
    pub side: TransSide,
    pub subcom: u16,
    pub tdcnt: u32,
    pub tpcnt: u32,
    pub dsent: u32,
    pub psent: u32,
    pub dbuf: Option<FragBuf>,
    pub pbuf: Option<FragBuf>,
    pub pipe_byte_mode: bool,
    pub one_way: bool,
    pub disconnect_tid: bool,
    pub info_level: u16,
}

impl TransactionTracker {
    /// A side is complete when every declared parameter and data byte has
    /// been seen. A fresh tracker counts as complete.
    pub fn is_complete(&self) -> bool {
        self.dsent == self.tdcnt && self.psent == self.tpcnt
    }

    /// First response fragment after the request side: drop the request
    /// buffers and reseed progress from the response header.
    pub(crate) fn reinit_for_response(&mut self, tdcnt: u32, tpcnt: u32) {
        self.side = TransSide::Response;
        self.tdcnt = tdcnt;
        self.tpcnt = tpcnt;
        self.dsent = 0;
        self.psent = 0;
        self.dbuf = None;
        self.pbuf = None;
    }

    /// Samba resets a total that a later fragment declares smaller.
    /// Totals never grow.
    pub(crate) fn lower_totals(&mut self, tdcnt: u32, tpcnt: u32) {
        if tdcnt < self.tdcnt {
            self.tdcnt = tdcnt;
            if let Some(buf) = &mut self.dbuf {
                buf.lower_total(tdcnt as usize);
            }
        }
        if tpcnt < self.tpcnt {
            self.tpcnt = tpcnt;
            if let Some(buf) = &mut self.pbuf {
                buf.lower_total(tpcnt as usize);
            }
        }
    }

    pub(crate) fn buffer_data(
        &mut self, bytes: &[u8], disp: u32, mode: AppendMode,
    ) -> Result<(), ()> {
        let total = self.tdcnt as usize;
        let buf = self.dbuf.get_or_insert_with(|| FragBuf::new(total));
        buf.append_at(disp as usize, bytes, mode)
    }

    pub(crate) fn buffer_params(
        &mut self, bytes: &[u8], disp: u32, mode: AppendMode,
    ) -> Result<(), ()> {
        let total = self.tpcnt as usize;
        let buf = self.pbuf.get_or_insert_with(|| FragBuf::new(total));
        buf.append_at(disp as usize, bytes, mode)
    }

    pub fn dbuf_is_empty(&self) -> bool {
        self.dbuf.as_ref().map_or(true, |b| b.is_empty())
    }

    pub fn pbuf_is_empty(&self) -> bool {
        self.pbuf.as_ref().map_or(true, |b| b.is_empty())
    }

    pub(crate) fn take_dbuf(&mut self) -> Vec<u8> {
        self.dbuf.take().map(FragBuf::into_bytes).unwrap_or_default()
    }

    pub(crate) fn take_pbuf(&mut self) -> Vec<u8> {
        self.pbuf.take().map(FragBuf::into_bytes).unwrap_or_default()
    }
}

/// Per request tracking set up by the outer dispatcher when it sees a new
/// transaction primary.
#[derive(Debug, Default)]
pub struct RequestTracker {
    pub uid: u16,
    pub tid: u16,
    pub ttracker: TransactionTracker,
    /// File name captured from the request, handed to the tracker the
    /// response creates.
    pub file_name: Option<String>,
    pub file_size: u64,
    pub sequential_only: bool,
    /// Tracker the request resolved to, by arena key.
    pub ftracker: Option<FileKey>,
}

/// One SMB session's inspection state. Single threaded; the engine never
/// blocks and never suspends inside a session.
pub struct SmbState {
    pub config: SmbConfig,
    pub ftrackers: HashMap<FileKey, FileTracker>,
    /// File currently fronting the file API, if any.
    pub fapi_ftracker: Option<FileKey>,
    pub ipc_tids: HashSet<u16>,
    pub cur_rtracker: Option<RequestTracker>,
    pub events: Vec<SmbEvent>,
    pub dcerpc: Box<dyn DcerpcAnalyzer>,
    pub(crate) rpkt_busy: bool,
}

impl Default for SmbState {
    fn default() -> SmbState {
        SmbState::new(SmbConfig::default())
    }
}

impl SmbState {
    pub fn new(config: SmbConfig) -> SmbState {
        SmbState {
            config,
            ftrackers: HashMap::new(),
            fapi_ftracker: None,
            ipc_tids: HashSet::new(),
            cur_rtracker: None,
            events: Vec::new(),
            dcerpc: Box::new(NullDcerpc),
            rpkt_busy: false,
        }
    }

    pub fn set_event(&mut self, event: SmbEvent) {
        self.events.push(event);
    }

    /// Install a fresh request tracker, as the outer dispatcher does when
    /// a new transaction primary shows up.
    pub fn new_request_tracker(&mut self, uid: u16, tid: u16) {
        self.cur_rtracker = Some(RequestTracker {
            uid,
            tid,
            ..Default::default()
        });
    }

    /// Retire the request tracker and the transaction state it owns.
    pub fn retire_request_tracker(&mut self) {
        self.cur_rtracker = None;
    }

    /// Session teardown: release everything.
    pub fn clear(&mut self) {
        self.ftrackers.clear();
        self.fapi_ftracker = None;
        self.ipc_tids.clear();
        self.cur_rtracker = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_com_info_sizes() {
        let ci = ComInfo::new(SMB1_COMMAND_TRANS, MessageType::Request, 16, 60);
        assert_eq!(ci.com_size, 35);
        assert!(ci.is_request());
        let interim = ComInfo::new(SMB1_COMMAND_TRANS2, MessageType::Response, 0, 0);
        assert_eq!(interim.com_size, SMB_COM_SIZE_INTERIM_RESP);
    }

    #[test]
    fn test_tracker_completion() {
        let mut tt = TransactionTracker::default();
        assert!(tt.is_complete());
        tt.tdcnt = 10;
        tt.dsent = 4;
        assert!(!tt.is_complete());
        tt.dsent = 10;
        assert!(tt.is_complete());
    }

    #[test]
    fn test_tracker_response_reinit() {
        let mut tt = TransactionTracker {
            side: TransSide::Request,
            tdcnt: 8,
            dsent: 8,
            ..Default::default()
        };
        tt.buffer_data(&[0; 8], 0, AppendMode::Strict).unwrap();
        tt.reinit_for_response(100, 2);
        assert_eq!(tt.side, TransSide::Response);
        assert_eq!(tt.tdcnt, 100);
        assert_eq!(tt.tpcnt, 2);
        assert_eq!(tt.dsent, 0);
        assert!(tt.dbuf_is_empty());
    }

    #[test]
    fn test_tracker_lower_totals_only_shrinks() {
        let mut tt = TransactionTracker {
            tdcnt: 100,
            tpcnt: 10,
            ..Default::default()
        };
        tt.lower_totals(120, 20);
        assert_eq!(tt.tdcnt, 100);
        assert_eq!(tt.tpcnt, 10);
        tt.lower_totals(50, 10);
        assert_eq!(tt.tdcnt, 50);
    }

    #[test]
    fn test_unicode_flag() {
        let hdr = SmbNtHdr {
            flags2: SMB_FLAGS2_UNICODE,
            uid: 1,
            tid: 1,
        };
        assert!(hdr.is_unicode());
        assert!(!SmbNtHdr::default().is_unicode());
    }
}
