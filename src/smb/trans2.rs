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

//! SMB_COM_TRANSACTION2: the file subcommands worth watching are OPEN2
//! and the query/set file information pair, which between them tell us
//! file names, sizes and attribute games.

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

/// TRANS2_OPEN2 request parameters: attribute check, allocation size and
/// the file name the eventual response ties to a FID.
fn trans2_open2_req(state: &mut SmbState, params: &[u8], unicode: bool) -> SmbStatus {
    if params.len() < SMB_TRANS2_OPEN2_REQ_PARAMS_LEN {
        return SmbStatus::Error;
    }
    let (rest, p) = match parse_smb_trans2_open2_req_params(params) {
        Ok(x) => x,
        Err(_) => return SmbStatus::Error,
    };
    let tid = match state.cur_rtracker.as_ref() {
        Some(rt) => rt.tid,
        None => return SmbStatus::Error,
    };
    if !state.is_tid_ipc(tid) {
        if smb_evasive_file_attrs(p.file_attrs as u32) {
            state.set_event(SmbEvent::EvasiveFileAttrs);
        }
        if let Some(rt) = state.cur_rtracker.as_mut() {
            rt.file_size = p.alloc_size as u64;
        }
    }
    let name = smb_get_string(rest, unicode, false);
    debug!("OPEN2 file name: {}", name);
    if let Some(rt) = state.cur_rtracker.as_mut() {
        rt.file_name = Some(name);
    }
    SmbStatus::Success
}

/// TRANS2_QUERY_FILE_INFORMATION request: note the info level so the
/// response data can be picked apart, unless the file is a pipe or being
/// uploaded.
fn trans2_query_file_info_req(state: &mut SmbState, params: &[u8]) -> SmbStatus {
    if params.len() < SMB_TRANS2_QUERY_FILE_INFO_REQ_PARAMS_LEN {
        return SmbStatus::Error;
    }
    let (_, p) = match parse_smb_trans2_query_file_info_req_params(params) {
        Ok(x) => x,
        Err(_) => return SmbStatus::Error,
    };
    let (uid, tid) = match state.cur_rtracker.as_ref() {
        Some(rt) => (rt.uid, rt.tid),
        None => return SmbStatus::Error,
    };
    let key = match state.find_file_tracker(uid, tid, p.fid) {
        Some(k) => k,
        None => return SmbStatus::Ignore,
    };
    let ft = match state.ftrackers.get(&key) {
        Some(f) => f,
        None => return SmbStatus::Ignore,
    };
    if ft.is_ipc || ft.ff_file_direction.is_upload() {
        return SmbStatus::Ignore;
    }
    if let Some(rt) = state.cur_rtracker.as_mut() {
        rt.ttracker.info_level = p.info_level;
        rt.ftracker = Some(key);
    }
    SmbStatus::Success
}

/// TRANS2_SET_FILE_INFORMATION request: attribute tampering is alerted
/// right here; an end of file set is remembered until the response
/// confirms it.
fn trans2_set_file_info_req(state: &mut SmbState, params: &[u8], data: &[u8]) -> SmbStatus {
    if params.len() < SMB_TRANS2_SET_FILE_INFO_REQ_PARAMS_LEN || data.len() < 8 {
        return SmbStatus::Error;
    }
    let (_, p) = match parse_smb_trans2_set_file_info_req_params(params) {
        Ok(x) => x,
        Err(_) => return SmbStatus::Error,
    };
    if let Some(rt) = state.cur_rtracker.as_mut() {
        rt.ttracker.info_level = p.info_level;
    }

    if smb_set_file_info_basic(p.info_level) && data.len() >= SMB_SET_FILE_BASIC_INFO_LEN {
        if let Ok((_, bi)) = parse_smb_set_file_basic_info(data) {
            if smb_evasive_file_attrs(bi.ext_file_attrs) {
                state.set_event(SmbEvent::EvasiveFileAttrs);
            }
        }
        // nothing of interest in the response
        return SmbStatus::Ignore;
    }

    if !smb_set_file_info_end_of_file(p.info_level) {
        return SmbStatus::Ignore;
    }

    let (uid, tid) = match state.cur_rtracker.as_ref() {
        Some(rt) => (rt.uid, rt.tid),
        None => return SmbStatus::Error,
    };
    let key = match state.find_file_tracker(uid, tid, p.fid) {
        Some(k) => k,
        None => return SmbStatus::Ignore,
    };
    let ft = match state.ftrackers.get(&key) {
        Some(f) => f,
        None => return SmbStatus::Ignore,
    };
    if ft.is_ipc || ft.ff_file_direction.is_download() || ft.ff_bytes_processed != 0 {
        return SmbStatus::Ignore;
    }

    let mut b = [0u8; 8];
    b.copy_from_slice(&data[..8]);
    if let Some(rt) = state.cur_rtracker.as_mut() {
        rt.file_size = u64::from_le_bytes(b);
        rt.ftracker = Some(key);
    }
    SmbStatus::Success
}

/// TRANS2_OPEN2 response: create a tracker for the FID the server handed
/// back and figure out the transfer direction and size.
fn trans2_open2_resp(state: &mut SmbState, params: &[u8]) -> SmbStatus {
    if params.len() < SMB_TRANS2_OPEN2_RESP_PARAMS_LEN {
        return SmbStatus::Error;
    }
    let (_, p) = match parse_smb_trans2_open2_resp_params(params) {
        Ok(x) => x,
        Err(_) => return SmbStatus::Error,
    };
    let (uid, tid) = match state.cur_rtracker.as_ref() {
        Some(rt) => (rt.uid, rt.tid),
        None => return SmbStatus::Error,
    };
    let is_ipc = state.is_tid_ipc(tid);
    if !is_ipc
        && (smb_file_attrs_directory(p.file_attrs as u32)
            || !smb_resource_type_disk(p.resource_type))
    {
        return SmbStatus::Success;
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
        if smb_open_result_read(p.action_taken) {
            ft.ff_file_size = p.file_data_size as u64;
        } else {
            ft.ff_file_size = req_file_size;
            ft.ff_file_direction = FileDirection::Upload;
        }
    }
    SmbStatus::Success
}

/// TRANS2_QUERY_FILE_INFORMATION response: pull the file size out of
/// whatever layout the requested info level mandates.
fn trans2_query_file_info_resp(state: &mut SmbState, data: &[u8]) -> SmbStatus {
    let (key, info_level) = match state.cur_rtracker.as_ref() {
        Some(rt) => match rt.ftracker {
            Some(k) => (k, rt.ttracker.info_level),
            None => return SmbStatus::Error,
        },
        None => return SmbStatus::Error,
    };
    let level: Option<QueryInfoLevel> = num::FromPrimitive::from_u16(info_level);
    if let Some(level) = level {
        if let Some(size) = smb_query_info_file_size(level, data) {
            debug!("query file info level {:#06x}: size {}", info_level, size);
            if let Some(ft) = state.ftrackers.get_mut(&key) {
                ft.ff_file_size = size;
            }
        }
    }
    SmbStatus::Success
}

/// TRANS2_SET_FILE_INFORMATION response: commit the size captured from
/// the request if the server reported success.
fn trans2_set_file_info_resp(state: &mut SmbState, params: &[u8]) -> SmbStatus {
    let key = match state.cur_rtracker.as_ref().and_then(|rt| rt.ftracker) {
        Some(k) => k,
        None => return SmbStatus::Error,
    };
    if params.len() >= 2 && u16::from_le_bytes([params[0], params[1]]) == 0 {
        let size = match state.cur_rtracker.as_ref() {
            Some(rt) => rt.file_size,
            None => return SmbStatus::Error,
        };
        if let Some(ft) = state.ftrackers.get_mut(&key) {
            ft.ff_file_size = size;
        }
    }
    SmbStatus::Success
}

/// SMB_COM_TRANSACTION2 entry point.
pub fn smb_transaction2(
    state: &mut SmbState, hdr: &SmbNtHdr, com_info: &ComInfo, pdu: &[u8], com_offset: usize,
) -> SmbStatus {
    let in_progress = match state.cur_rtracker.as_ref() {
        Some(rt) => !rt.ttracker.is_complete(),
        None => return SmbStatus::Error,
    };
    if com_info.is_request() && in_progress {
        debug!("new transaction2 request matching one in progress, not inspecting");
        return SmbStatus::Error;
    }
    if !com_info.can_process() {
        return SmbStatus::Error;
    }
    if com_info.is_response() && com_info.com_size == SMB_COM_SIZE_INTERIM_RESP {
        debug!("server transaction2 interim response");
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
        let r = match parse_smb_trans2_request_record(nb) {
            Ok((_, r)) => r,
            Err(_) => return SmbStatus::Error,
        };
        let params = pdu_region(pdu, r.param_off as u32, r.param_cnt as u32).unwrap_or(&[]);

        match r.subcom {
            TRANS2_OPEN2 => {
                if trans2_open2_req(state, params, hdr.is_unicode()) != SmbStatus::Success {
                    return SmbStatus::Error;
                }
            }
            TRANS2_QUERY_FILE_INFORMATION => {
                let status = trans2_query_file_info_req(state, params);
                if status != SmbStatus::Success {
                    return status;
                }
            }
            TRANS2_SET_FILE_INFORMATION => {
                let data = pdu_region(pdu, r.data_off as u32, r.data_cnt as u32).unwrap_or(&[]);
                let status = trans2_set_file_info_req(state, params, data);
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
        let sub_com = match state.cur_rtracker.as_ref() {
            Some(rt) => rt.ttracker.subcom,
            None => return SmbStatus::Error,
        };
        match sub_com {
            TRANS2_OPEN2 => {
                let params = match assembled_response_stream(
                    state,
                    com_info,
                    pdu,
                    com_offset,
                    RespStream::Params,
                ) {
                    Some(p) => p,
                    None => return SmbStatus::Error,
                };
                trans2_open2_resp(state, &params)
            }
            TRANS2_QUERY_FILE_INFORMATION => {
                let data = match assembled_response_stream(
                    state,
                    com_info,
                    pdu,
                    com_offset,
                    RespStream::Data,
                ) {
                    Some(d) => d,
                    None => return SmbStatus::Error,
                };
                trans2_query_file_info_resp(state, &data)
            }
            TRANS2_SET_FILE_INFORMATION => {
                let params = match assembled_response_stream(
                    state,
                    com_info,
                    pdu,
                    com_offset,
                    RespStream::Params,
                ) {
                    Some(p) => p,
                    None => return SmbStatus::Error,
                };
                trans2_set_file_info_resp(state, &params)
            }
            _ => SmbStatus::Success,
        }
    }
}

/// SMB_COM_TRANSACTION2_SECONDARY entry point.
pub fn smb_transaction2_secondary(
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
    let (dbytes, pbytes) = match state.cur_rtracker.as_mut() {
        Some(rt) => (rt.ttracker.take_dbuf(), rt.ttracker.take_pbuf()),
        None => return SmbStatus::Error,
    };

    match sub_com {
        TRANS2_OPEN2 => {
            let status = trans2_open2_req(state, &pbytes, hdr.is_unicode());
            if status != SmbStatus::Success {
                return status;
            }
        }
        TRANS2_QUERY_FILE_INFORMATION => {
            let status = trans2_query_file_info_req(state, &pbytes);
            if status != SmbStatus::Success {
                return status;
            }
        }
        TRANS2_SET_FILE_INFORMATION => {
            let status = trans2_set_file_info_req(state, &pbytes, &dbytes);
            if status != SmbStatus::Success {
                return status;
            }
        }
        _ => {}
    }
    SmbStatus::Success
}
