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

//! SMB_COM_NT_TRANSACT: NT_TRANSACT_CREATE is just another way to open a
//! file or named pipe, so it gets the same treatment as the create
//! commands.

use log::debug;

use crate::smb::events::SmbEvent;
use crate::smb::files::FileDirection;
use crate::smb::funcs::{smb_evasive_file_attrs, smb_get_string};
use crate::smb::smb::{
    ComInfo, SmbNtHdr, SmbState, SmbStatus, TransStatus, SMB_COM_SIZE_INTERIM_RESP,
};
use crate::smb::smb1_records::*;
use crate::smb::trans::{
    assembled_response_stream, pdu_region, update_trans_request, update_trans_response,
    update_trans_secondary, RespStream,
};

/// NT_TRANSACT_CREATE request parameters: attribute check, sequential
/// only hint, allocation size, and the file name.
fn nt_transact_create_req(state: &mut SmbState, params: &[u8], unicode: bool) -> SmbStatus {
    if params.len() < SMB_NT_TRANSACT_CREATE_REQ_PARAMS_LEN {
        return SmbStatus::Error;
    }
    let (_, p) = match parse_smb_nt_transact_create_req_params(params) {
        Ok(x) => x,
        Err(_) => return SmbStatus::Error,
    };
    let tid = match state.cur_rtracker.as_ref() {
        Some(rt) => rt.tid,
        None => return SmbStatus::Error,
    };

    if !state.is_tid_ipc(tid) {
        if smb_evasive_file_attrs(p.ext_file_attrs) {
            state.set_event(SmbEvent::EvasiveFileAttrs);
        }
        if let Some(rt) = state.cur_rtracker.as_mut() {
            // a sequential only open is worth remembering
            if p.sequential_only() {
                rt.sequential_only = true;
            }
            rt.file_size = p.alloc_size;
        }
    }

    if p.file_name_length > state.config.max_path_len {
        debug!("file name length {} over limit", p.file_name_length);
        return SmbStatus::Error;
    }
    let name_len = p.file_name_length as usize;

    // a Unicode name realigns to the next even offset
    let off = SMB_NT_TRANSACT_CREATE_REQ_PARAMS_LEN;
    let pad = if unicode { off & 1 } else { 0 };
    if params.len() - off < pad + name_len {
        return SmbStatus::Error;
    }
    let name_bytes = &params[off + pad..off + pad + name_len];
    let name = smb_get_string(name_bytes, unicode, false);
    debug!("NT_TRANSACT_CREATE file name: {}", name);
    if let Some(rt) = state.cur_rtracker.as_mut() {
        rt.file_name = Some(name);
    }
    SmbStatus::Success
}

/// NT_TRANSACT_CREATE response: create the tracker, preferring
/// sequential only files for the file API.
fn nt_transact_create_resp(state: &mut SmbState, params: &[u8]) -> SmbStatus {
    if params.len() < SMB_NT_TRANSACT_CREATE_RESP_PARAMS_LEN {
        return SmbStatus::Error;
    }
    let (_, p) = match parse_smb_nt_transact_create_resp_params(params) {
        Ok(x) => x,
        Err(_) => return SmbStatus::Error,
    };
    let (uid, tid, sequential_only) = match state.cur_rtracker.as_ref() {
        Some(rt) => (rt.uid, rt.tid, rt.sequential_only),
        None => return SmbStatus::Error,
    };
    let is_ipc = state.is_tid_ipc(tid);

    if !is_ipc {
        if p.directory || !smb_resource_type_disk(p.resource_type) {
            return SmbStatus::Success;
        }
        // give preference to files opened with the sequential only flag
        let fapi_sequential = state
            .fapi_ftracker
            .and_then(|k| state.ftrackers.get(&k))
            .map_or(false, |f| f.ff_sequential_only);
        if !fapi_sequential && sequential_only {
            state.abort_file_api();
        }
    }

    let key = state.new_file_tracker(uid, tid, p.fid);
    let (name, req_file_size) = match state.cur_rtracker.as_mut() {
        Some(rt) => (rt.file_name.take(), rt.file_size),
        None => return SmbStatus::Error,
    };
    let ft = match state.ftrackers.get_mut(&key) {
        Some(f) => f,
        None => return SmbStatus::Error,
    };
    ft.file_name = name;
    if !ft.is_ipc {
        if smb_create_action_read(p.create_action) {
            ft.ff_file_size = p.end_of_file;
        } else {
            ft.ff_file_size = req_file_size;
            ft.ff_file_direction = FileDirection::Upload;
        }
        ft.ff_sequential_only = sequential_only;
    }
    SmbStatus::Success
}

/// SMB_COM_NT_TRANSACT entry point.
pub fn smb_nt_transact(
    state: &mut SmbState, hdr: &SmbNtHdr, com_info: &ComInfo, pdu: &[u8], com_offset: usize,
) -> SmbStatus {
    let in_progress = match state.cur_rtracker.as_ref() {
        Some(rt) => !rt.ttracker.is_complete(),
        None => return SmbStatus::Error,
    };
    if com_info.is_request() && in_progress {
        debug!("new nt transact request matching one in progress, not inspecting");
        return SmbStatus::Error;
    }
    if !com_info.can_process() {
        return SmbStatus::Error;
    }
    if com_info.is_response() && com_info.com_size == SMB_COM_SIZE_INTERIM_RESP {
        debug!("server nt transact interim response");
        return SmbStatus::Success;
    }

    if com_info.is_request() {
        match update_trans_request(state, hdr, com_info, pdu, com_offset) {
            TransStatus::Full => {}
            s => return s.into_smb_status(),
        }

        let nb = match pdu.get(com_offset..) {
            Some(nb) => nb,
            None => return SmbStatus::Error,
        };
        let r = match parse_smb_nt_transact_request_record(nb) {
            Ok((_, r)) => r,
            Err(_) => return SmbStatus::Error,
        };
        let params = pdu_region(pdu, r.param_off, r.param_cnt).unwrap_or(&[]);

        match r.subcom {
            NT_TRANSACT_CREATE => {
                let status = nt_transact_create_req(state, params, hdr.is_unicode());
                if status != SmbStatus::Success {
                    return status;
                }
            }
            _ => return SmbStatus::Ignore,
        }
        SmbStatus::Success
    } else {
        match update_trans_response(state, hdr, com_info, pdu, com_offset) {
            TransStatus::Full => {}
            s => return s.into_smb_status(),
        }
        let params =
            match assembled_response_stream(state, com_info, pdu, com_offset, RespStream::Params) {
                Some(p) => p,
                None => return SmbStatus::Error,
            };
        nt_transact_create_resp(state, &params)
    }
}

/// SMB_COM_NT_TRANSACT_SECONDARY entry point.
pub fn smb_nt_transact_secondary(
    state: &mut SmbState, hdr: &SmbNtHdr, com_info: &ComInfo, pdu: &[u8], com_offset: usize,
) -> SmbStatus {
    if !com_info.can_process() {
        return SmbStatus::Error;
    }
    match update_trans_secondary(state, hdr, com_info, pdu, com_offset) {
        TransStatus::Full => {}
        s => return s.into_smb_status(),
    }

    let sub_com = match state.cur_rtracker.as_ref() {
        Some(rt) => rt.ttracker.subcom,
        None => return SmbStatus::Error,
    };
    let pbytes = match state.cur_rtracker.as_mut() {
        Some(rt) => rt.ttracker.take_pbuf(),
        None => return SmbStatus::Error,
    };

    if sub_com == NT_TRANSACT_CREATE {
        let status = nt_transact_create_req(state, &pbytes, hdr.is_unicode());
        if status != SmbStatus::Success {
            return status;
        }
    }
    SmbStatus::Success
}
