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

//! Per session file and named pipe trackers.
//!
//! Trackers live in an arena keyed by `(uid, tid, fid)`; everything else
//! refers to them by key, never by pointer, so the session owns them
//! without reference cycles.

use log::debug;

use crate::smb::smb::SmbState;

pub type FileKey = (u16, u16, u16);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FileDirection {
    #[default]
    Unknown,
    Upload,
    Download,
}

impl FileDirection {
    pub fn is_upload(self) -> bool {
        self == FileDirection::Upload
    }

    pub fn is_download(self) -> bool {
        self == FileDirection::Download
    }
}

/// State for one open FID: a disk file or a named pipe.
#[derive(Debug, Default)]
pub struct FileTracker {
    pub uid: u16,
    pub tid: u16,
    pub fid: u16,
    pub is_ipc: bool,
    pub file_name: Option<String>,
    pub ff_file_size: u64,
    pub ff_file_direction: FileDirection,
    pub ff_sequential_only: bool,
    pub ff_bytes_processed: u64,
    /// Named pipe read granularity, set through SET_NMPIPE_STATE.
    pub fp_byte_mode: bool,
}

impl SmbState {
    /// Record a tree connect so later commands can tell IPC$ trees from
    /// disk trees.
    pub fn add_tree(&mut self, tid: u16, is_ipc: bool) {
        if is_ipc {
            self.ipc_tids.insert(tid);
        } else {
            self.ipc_tids.remove(&tid);
        }
    }

    pub fn is_tid_ipc(&self, tid: u16) -> bool {
        self.ipc_tids.contains(&tid)
    }

    pub fn find_file_tracker(&self, uid: u16, tid: u16, fid: u16) -> Option<FileKey> {
        let key = (uid, tid, fid);
        if self.ftrackers.contains_key(&key) {
            Some(key)
        } else {
            None
        }
    }

    /// Look a tracker up by FID alone; TRANSACTION carries only the FID.
    pub fn file_tracker_by_fid(&self, fid: u16) -> Option<FileKey> {
        self.ftrackers.keys().find(|k| k.2 == fid).copied()
    }

    /// Create (or replace) the tracker for an opened FID. Non IPC files
    /// become the file API tracker when no other file holds that role.
    pub fn new_file_tracker(&mut self, uid: u16, tid: u16, fid: u16) -> FileKey {
        let key = (uid, tid, fid);
        let is_ipc = self.is_tid_ipc(tid);
        debug!(
            "new file tracker uid {} tid {} fid {:#06x} ipc {}",
            uid, tid, fid, is_ipc
        );
        self.ftrackers.insert(
            key,
            FileTracker {
                uid,
                tid,
                fid,
                is_ipc,
                ..Default::default()
            },
        );
        if !is_ipc && self.fapi_ftracker.is_none() {
            self.fapi_ftracker = Some(key);
        }
        key
    }

    /// Drop a tree connection and every tracker opened under it.
    pub fn remove_tid(&mut self, tid: u16) {
        debug!("removing tid {}", tid);
        self.ipc_tids.remove(&tid);
        self.ftrackers.retain(|k, _| k.1 != tid);
        if let Some(key) = self.fapi_ftracker {
            if key.1 == tid {
                self.fapi_ftracker = None;
            }
        }
    }

    /// Stop tracking the current file API file; its role is up for grabs.
    pub fn abort_file_api(&mut self) {
        if let Some(key) = self.fapi_ftracker.take() {
            debug!("aborting file api tracking for fid {:#06x}", key.2);
        }
    }
}
