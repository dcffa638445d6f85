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

//! SMB_COM_TRANSACTION handling plus the fragment ingest logic shared by
//! all three transaction families.
//!
//! A transaction carries two independent byte streams, parameters and
//! data, each with its own total, per fragment count, offset and
//! displacement. The ingestors below reassemble both streams across the
//! primary request, `*_SECONDARY` continuations and response fragments,
//! and report `Full` when a side is complete so the per subcommand
//! handlers can run over the assembled bytes.

use log::debug;

use crate::smb::dcerpc::Direction;
use crate::smb::events::SmbEvent;
use crate::smb::funcs::smb_trans_name_is_pipe;
use crate::smb::smb::{
    ComInfo, SmbNtHdr, SmbState, SmbStatus, TransSide, TransStatus, SMB1_COMMAND_NT_TRANS,
    SMB1_COMMAND_NT_TRANS_SECONDARY, SMB1_COMMAND_TRANS, SMB1_COMMAND_TRANS2,
    SMB1_COMMAND_TRANS2_SECONDARY, SMB1_COMMAND_TRANS_SECONDARY, SMB_COM_SIZE_INTERIM_RESP,
};
use crate::smb::smb1_records::*;

pub(crate) const TRANS_STREAMS_NONE: u8 = 0x00;
pub(crate) const TRANS_STREAMS_DATA: u8 = 0x01;
pub(crate) const TRANS_STREAMS_PARAMS: u8 = 0x02;
pub(crate) const TRANS_STREAMS_BOTH: u8 = TRANS_STREAMS_DATA | TRANS_STREAMS_PARAMS;

/// Parameters and data may be interleaved with a few alignment pad bytes
/// inside the byte count area, so the count comparison gets this much
/// slack.
pub(crate) const TRANS_PAD_ALLOWANCE: u32 = 4;

/// Slice a count of bytes at an offset measured from the SMB header.
pub(crate) fn pdu_region(pdu: &[u8], off: u32, cnt: u32) -> Option<&[u8]> {
    let off = off as usize;
    let end = off.checked_add(cnt as usize)?;
    pdu.get(off..end)
}

/// Structural checks every fragment must pass before any byte is used.
pub(crate) fn validate_transaction_fields(
    pdu: &[u8], byte_count: u16, f: &TransFragFields,
) -> Result<(), ()> {
    // a fragment may not claim bytes beyond the declared stream total
    if f.ddisp as u64 + f.dcnt as u64 > f.tdcnt as u64 {
        debug!(
            "data fragment [{}+{}] exceeds total {}",
            f.ddisp, f.dcnt, f.tdcnt
        );
        return Err(());
    }
    if f.pdisp as u64 + f.pcnt as u64 > f.tpcnt as u64 {
        debug!(
            "param fragment [{}+{}] exceeds total {}",
            f.pdisp, f.pcnt, f.tpcnt
        );
        return Err(());
    }
    // both stream slices live inside the byte count area, modulo
    // alignment padding
    if f.dcnt as u64 + f.pcnt as u64 > byte_count as u64 + TRANS_PAD_ALLOWANCE as u64 {
        debug!(
            "dcnt {} + pcnt {} larger than byte count {}",
            f.dcnt, f.pcnt, byte_count
        );
        return Err(());
    }
    check_region(pdu, f.doff, f.dcnt)?;
    check_region(pdu, f.poff, f.pcnt)?;
    Ok(())
}

fn check_region(pdu: &[u8], off: u32, cnt: u32) -> Result<(), ()> {
    let end = off as u64 + cnt as u64;
    if off as u64 > pdu.len() as u64 || end > pdu.len() as u64 {
        debug!("region [{}, {}) outside pdu of {} bytes", off, end, pdu.len());
        return Err(());
    }
    if cnt != 0 && off == 0 {
        debug!("count {} with nonsense offset 0", cnt);
        return Err(());
    }
    Ok(())
}

/// Progress check: a fragment may never push a stream past its total.
pub(crate) fn validate_transaction_sent(
    dsent: u32, dcnt: u32, tdcnt: u32, psent: u32, pcnt: u32, tpcnt: u32,
) -> Result<(), ()> {
    if dsent as u64 + dcnt as u64 > tdcnt as u64 {
        debug!("data overshoot: {} sent, {} more, {} total", dsent, dcnt, tdcnt);
        return Err(());
    }
    if psent as u64 + pcnt as u64 > tpcnt as u64 {
        debug!("param overshoot: {} sent, {} more, {} total", psent, pcnt, tpcnt);
        return Err(());
    }
    Ok(())
}

/// Which streams a subcommand carries on a secondary fragment. None when
/// the subcommand is not tracked.
fn secondary_streams(smb_com: u8, sub_com: u16) -> Option<u8> {
    match smb_com {
        SMB1_COMMAND_TRANS_SECONDARY => match sub_com {
            TRANS_TRANSACT_NMPIPE | TRANS_WRITE_NMPIPE => Some(TRANS_STREAMS_DATA),
            TRANS_SET_NMPIPE_STATE => Some(TRANS_STREAMS_PARAMS),
            _ => None,
        },
        SMB1_COMMAND_TRANS2_SECONDARY => match sub_com {
            TRANS2_OPEN2 | TRANS2_QUERY_FILE_INFORMATION => Some(TRANS_STREAMS_PARAMS),
            TRANS2_SET_FILE_INFORMATION => Some(TRANS_STREAMS_BOTH),
            _ => None,
        },
        SMB1_COMMAND_NT_TRANS_SECONDARY => match sub_com {
            NT_TRANSACT_CREATE => Some(TRANS_STREAMS_PARAMS),
            _ => None,
        },
        _ => None,
    }
}

/// Which streams a subcommand's response carries.
fn response_streams(smb_com: u8, sub_com: u16) -> Option<u8> {
    match smb_com {
        SMB1_COMMAND_TRANS => match sub_com {
            TRANS_TRANSACT_NMPIPE | TRANS_READ_NMPIPE => Some(TRANS_STREAMS_DATA),
            TRANS_SET_NMPIPE_STATE | TRANS_WRITE_NMPIPE => Some(TRANS_STREAMS_PARAMS),
            _ => None,
        },
        SMB1_COMMAND_TRANS2 => match sub_com {
            TRANS2_OPEN2 | TRANS2_SET_FILE_INFORMATION => Some(TRANS_STREAMS_PARAMS),
            TRANS2_QUERY_FILE_INFORMATION => Some(TRANS_STREAMS_DATA),
            _ => None,
        },
        SMB1_COMMAND_NT_TRANS => match sub_com {
            NT_TRANSACT_CREATE => Some(TRANS_STREAMS_PARAMS),
            _ => None,
        },
        _ => None,
    }
}

/// Request Fragment Ingestor: parse a transaction primary, seed the
/// tracker and buffer whatever part of either stream arrived.
pub(crate) fn update_trans_request(
    state: &mut SmbState, hdr: &SmbNtHdr, com_info: &ComInfo, pdu: &[u8], com_offset: usize,
) -> TransStatus {
    let com_size = com_info.com_size as usize;
    let nb = match pdu.get(com_offset..) {
        Some(nb) => nb,
        None => return TransStatus::Error,
    };

    let sub_com;
    let fields;
    let data_params;
    let mut trans_flags = None;

    match com_info.smb_com {
        SMB1_COMMAND_TRANS => {
            let r = match parse_smb_trans_request_record(nb) {
                Ok((_, r)) => r,
                Err(_) => return TransStatus::Error,
            };
            debug!(
                "transaction subcommand: {} ({:#06x})",
                smb_trans_subcom_string(r.subcom),
                r.subcom
            );

            // named pipe transactions always address an open FID
            let fkey = state.file_tracker_by_fid(r.fid);
            if fkey.is_none() {
                return TransStatus::Ignore;
            }
            if let Some(rt) = state.cur_rtracker.as_mut() {
                rt.ftracker = fkey;
            }

            let mut streams = TRANS_STREAMS_NONE;
            match r.subcom {
                TRANS_TRANSACT_NMPIPE => {
                    let byte_mode = fkey
                        .and_then(|k| state.ftrackers.get(&k))
                        .map_or(false, |f| f.fp_byte_mode);
                    if state.config.policy.is_windows() && byte_mode {
                        debug!("pipe is in byte mode, TRANS_TRANSACT_NMPIPE won't work");
                        return TransStatus::Error;
                    }
                    streams = TRANS_STREAMS_DATA;
                }
                TRANS_READ_NMPIPE => {
                    state.set_event(SmbEvent::UnusualCommandUsed);
                }
                TRANS_SET_NMPIPE_STATE => {
                    streams = TRANS_STREAMS_PARAMS;
                }
                TRANS_WRITE_NMPIPE => {
                    state.set_event(SmbEvent::UnusualCommandUsed);
                    streams = TRANS_STREAMS_DATA;
                }
                // not implemented, crippled, or a bind at most; none are
                // worth tracking
                TRANS_RAW_READ_NMPIPE | TRANS_RAW_WRITE_NMPIPE | TRANS_CALL_NMPIPE => {
                    state.set_event(SmbEvent::DeprecatedCommandUsed);
                    return TransStatus::Ignore;
                }
                _ => {
                    return TransStatus::Ignore;
                }
            }

            // servers reject a wrong setup count
            if r.setup_cnt != 2 {
                state.set_event(SmbEvent::InvalidSetupCount);
                return TransStatus::Error;
            }

            // Samba validates the transaction name, Windows doesn't care
            if state.config.policy.is_samba()
                && !smb_trans_name_is_pipe(
                    pdu,
                    com_offset + com_size,
                    com_info.byte_count,
                    hdr.is_unicode(),
                )
            {
                debug!("failed to validate pipe name for Samba");
                return TransStatus::Error;
            }

            sub_com = r.subcom;
            fields = r.frag_fields();
            data_params = streams;
            trans_flags = Some((r.disconnect_tid(), r.one_way()));
        }

        SMB1_COMMAND_TRANS2 => {
            let r = match parse_smb_trans2_request_record(nb) {
                Ok((_, r)) => r,
                Err(_) => return TransStatus::Error,
            };
            debug!(
                "transaction2 subcommand: {} ({:#06x})",
                smb_trans2_subcom_string(r.subcom),
                r.subcom
            );

            let streams = match r.subcom {
                TRANS2_OPEN2 => {
                    state.set_event(SmbEvent::UnusualCommandUsed);
                    TRANS_STREAMS_PARAMS
                }
                TRANS2_QUERY_FILE_INFORMATION => TRANS_STREAMS_PARAMS,
                TRANS2_SET_FILE_INFORMATION => TRANS_STREAMS_BOTH,
                _ => {
                    return TransStatus::Ignore;
                }
            };

            if r.setup_cnt != 1 {
                state.set_event(SmbEvent::InvalidSetupCount);
                return TransStatus::Error;
            }

            sub_com = r.subcom;
            fields = r.frag_fields();
            data_params = streams;
        }

        SMB1_COMMAND_NT_TRANS => {
            let r = match parse_smb_nt_transact_request_record(nb) {
                Ok((_, r)) => r,
                Err(_) => return TransStatus::Error,
            };
            debug!(
                "nt transact subcommand: {} ({:#06x})",
                smb_nt_transact_subcom_string(r.subcom),
                r.subcom
            );

            match r.subcom {
                NT_TRANSACT_CREATE => {
                    state.set_event(SmbEvent::UnusualCommandUsed);
                    if r.setup_cnt != 0 {
                        state.set_event(SmbEvent::InvalidSetupCount);
                        return TransStatus::Error;
                    }
                }
                _ => {
                    return TransStatus::Ignore;
                }
            }

            sub_com = r.subcom;
            fields = r.frag_fields();
            data_params = TRANS_STREAMS_PARAMS;
        }

        _ => return TransStatus::Error,
    }

    if validate_transaction_fields(pdu, com_info.byte_count, &fields).is_err() {
        return TransStatus::Error;
    }

    if data_params & TRANS_STREAMS_DATA != 0 && fields.tdcnt == 0 {
        state.set_event(SmbEvent::DcntZero);
    }
    if data_params & TRANS_STREAMS_PARAMS != 0 && fields.tpcnt == 0 {
        state.set_event(SmbEvent::DcntZero);
    }

    let mode = state.config.policy.append_mode();
    let rt = match state.cur_rtracker.as_mut() {
        Some(rt) => rt,
        None => return TransStatus::Error,
    };
    let tt = &mut rt.ttracker;
    tt.side = TransSide::Request;
    tt.subcom = sub_com;
    tt.tdcnt = fields.tdcnt;
    tt.dsent = fields.dcnt;
    tt.tpcnt = fields.tpcnt;
    tt.psent = fields.pcnt;
    if let Some((disconnect_tid, one_way)) = trans_flags {
        tt.disconnect_tid = disconnect_tid;
        tt.one_way = one_way;
    }

    debug!(
        "data count: {}, total: {}, param count: {}, total: {}",
        fields.dcnt, fields.tdcnt, fields.pcnt, fields.tpcnt
    );

    // Transacts aren't acted on by servers until every data and parameter
    // byte arrived, so a partial side gets buffered per tracker to keep
    // interleaved transactions from mangling each other.
    let partial = fields.dcnt != fields.tdcnt || fields.pcnt != fields.tpcnt;

    if partial && data_params & TRANS_STREAMS_DATA != 0 && fields.dcnt != 0 {
        let bytes = match pdu_region(pdu, fields.doff, fields.dcnt) {
            Some(b) => b,
            None => return TransStatus::Error,
        };
        if tt.buffer_data(bytes, 0, mode).is_err() {
            return TransStatus::Error;
        }
    }
    if partial && data_params & TRANS_STREAMS_PARAMS != 0 && fields.pcnt != 0 {
        let bytes = match pdu_region(pdu, fields.poff, fields.pcnt) {
            Some(b) => b,
            None => return TransStatus::Error,
        };
        if tt.buffer_params(bytes, 0, mode).is_err() {
            return TransStatus::Error;
        }
    }

    if !partial {
        TransStatus::Full
    } else {
        TransStatus::Success
    }
}

/// Secondary Fragment Ingestor: apply a `*_SECONDARY` continuation to the
/// in flight request side.
pub(crate) fn update_trans_secondary(
    state: &mut SmbState, _hdr: &SmbNtHdr, com_info: &ComInfo, pdu: &[u8], com_offset: usize,
) -> TransStatus {
    let nb = match pdu.get(com_offset..) {
        Some(nb) => nb,
        None => return TransStatus::Error,
    };
    let sub_com = match state.cur_rtracker.as_ref() {
        Some(rt) => rt.ttracker.subcom,
        None => return TransStatus::Error,
    };

    let mut fields = match com_info.smb_com {
        SMB1_COMMAND_TRANS_SECONDARY => match parse_smb_trans_secondary_record(nb) {
            Ok((_, r)) => r.frag_fields(),
            Err(_) => return TransStatus::Error,
        },
        SMB1_COMMAND_TRANS2_SECONDARY => match parse_smb_trans2_secondary_record(nb) {
            Ok((_, r)) => r.frag_fields(),
            Err(_) => return TransStatus::Error,
        },
        SMB1_COMMAND_NT_TRANS_SECONDARY => match parse_smb_nt_transact_secondary_record(nb) {
            Ok((_, r)) => r.frag_fields(),
            Err(_) => return TransStatus::Error,
        },
        _ => return TransStatus::Error,
    };

    let data_params = match secondary_streams(com_info.smb_com, sub_com) {
        Some(dp) => dp,
        None => return TransStatus::Ignore,
    };

    let samba = state.config.policy.is_samba();
    let mode = state.config.policy.append_mode();
    let rt = match state.cur_rtracker.as_mut() {
        Some(rt) => rt,
        None => return TransStatus::Error,
    };
    let tt = &mut rt.ttracker;

    if samba {
        // a secondary that lowers a total resets it
        tt.lower_totals(fields.tdcnt, fields.tpcnt);
    }
    // Windows sticks with the totals from the first fragment; either way
    // validation runs against the tracker's totals
    fields.tdcnt = tt.tdcnt;
    fields.tpcnt = tt.tpcnt;

    if validate_transaction_fields(pdu, com_info.byte_count, &fields).is_err() {
        return TransStatus::Error;
    }

    if validate_transaction_sent(
        tt.dsent, fields.dcnt, tt.tdcnt, tt.psent, fields.pcnt, tt.tpcnt,
    )
    .is_err()
    {
        return TransStatus::Ignore;
    }

    debug!(
        "data displacement: {}, count: {}, total: {}; param displacement: {}, count: {}, total: {}",
        fields.ddisp, fields.dcnt, fields.tdcnt, fields.pdisp, fields.pcnt, fields.tpcnt
    );

    if data_params & TRANS_STREAMS_DATA != 0 && fields.dcnt != 0 {
        let bytes = match pdu_region(pdu, fields.doff, fields.dcnt) {
            Some(b) => b,
            None => return TransStatus::Error,
        };
        if tt.buffer_data(bytes, fields.ddisp, mode).is_err() {
            return TransStatus::Error;
        }
    }
    if data_params & TRANS_STREAMS_PARAMS != 0 && fields.pcnt != 0 {
        let bytes = match pdu_region(pdu, fields.poff, fields.pcnt) {
            Some(b) => b,
            None => return TransStatus::Error,
        };
        if tt.buffer_params(bytes, fields.pdisp, mode).is_err() {
            return TransStatus::Error;
        }
    }

    tt.dsent += fields.dcnt;
    tt.psent += fields.pcnt;

    if tt.is_complete() {
        TransStatus::Full
    } else {
        TransStatus::Success
    }
}

/// Response Fragment Ingestor: seed the response side on the first
/// fragment, then reassemble like the secondary path.
pub(crate) fn update_trans_response(
    state: &mut SmbState, _hdr: &SmbNtHdr, com_info: &ComInfo, pdu: &[u8], com_offset: usize,
) -> TransStatus {
    let nb = match pdu.get(com_offset..) {
        Some(nb) => nb,
        None => return TransStatus::Error,
    };
    let sub_com = match state.cur_rtracker.as_ref() {
        Some(rt) => rt.ttracker.subcom,
        None => return TransStatus::Error,
    };

    let fields = match com_info.smb_com {
        SMB1_COMMAND_TRANS | SMB1_COMMAND_TRANS2 => match parse_smb_trans_response_record(nb) {
            Ok((_, r)) => r.frag_fields(),
            Err(_) => return TransStatus::Error,
        },
        SMB1_COMMAND_NT_TRANS => match parse_smb_nt_transact_response_record(nb) {
            Ok((_, r)) => r.frag_fields(),
            Err(_) => return TransStatus::Error,
        },
        _ => return TransStatus::Error,
    };

    let data_params = match response_streams(com_info.smb_com, sub_com) {
        Some(dp) => dp,
        None => return TransStatus::Error,
    };

    let samba = state.config.policy.is_samba();
    let mode = state.config.policy.append_mode();
    let rt = match state.cur_rtracker.as_mut() {
        Some(rt) => rt,
        None => return TransStatus::Error,
    };
    let tt = &mut rt.ttracker;

    let mut fields = fields;
    match tt.side {
        TransSide::Request => {
            // first fragment of the response side
            tt.reinit_for_response(fields.tdcnt, fields.tpcnt);
        }
        TransSide::Response => {
            if samba {
                tt.lower_totals(fields.tdcnt, fields.tpcnt);
            }
        }
        TransSide::None => {
            debug!("response for a transaction that never had a request side");
            return TransStatus::Error;
        }
    }
    fields.tdcnt = tt.tdcnt;
    fields.tpcnt = tt.tpcnt;

    if validate_transaction_fields(pdu, com_info.byte_count, &fields).is_err() {
        return TransStatus::Error;
    }

    if validate_transaction_sent(
        tt.dsent, fields.dcnt, tt.tdcnt, tt.psent, fields.pcnt, tt.tpcnt,
    )
    .is_err()
    {
        return TransStatus::Error;
    }

    tt.dsent += fields.dcnt;
    tt.psent += fields.pcnt;

    debug!(
        "data displacement: {}, count: {}, total: {}; param displacement: {}, count: {}, total: {}",
        fields.ddisp, fields.dcnt, fields.tdcnt, fields.pdisp, fields.pcnt, fields.tpcnt
    );

    // a side that fits one PDU is consumed in place; only fragmented
    // sides are buffered
    if data_params & TRANS_STREAMS_DATA != 0 && fields.dcnt != 0 {
        let multi_frag = tt.dsent < tt.tdcnt || tt.psent < tt.tpcnt || !tt.dbuf_is_empty();
        if multi_frag {
            let bytes = match pdu_region(pdu, fields.doff, fields.dcnt) {
                Some(b) => b,
                None => return TransStatus::Error,
            };
            if tt.buffer_data(bytes, fields.ddisp, mode).is_err() {
                return TransStatus::Error;
            }
        }
    }
    if data_params & TRANS_STREAMS_PARAMS != 0 && fields.pcnt != 0 {
        let multi_frag = tt.dsent < tt.tdcnt || tt.psent < tt.tpcnt || !tt.pbuf_is_empty();
        if multi_frag {
            let bytes = match pdu_region(pdu, fields.poff, fields.pcnt) {
                Some(b) => b,
                None => return TransStatus::Error,
            };
            if tt.buffer_params(bytes, fields.pdisp, mode).is_err() {
                return TransStatus::Error;
            }
        }
    }

    if tt.is_complete() {
        TransStatus::Full
    } else {
        TransStatus::Success
    }
}

/// Pull an assembled response stream: the reassembly buffer when the side
/// was fragmented, otherwise a copy of the slice the response PDU itself
/// carries.
pub(crate) enum RespStream {
    Params,
    Data,
}

pub(crate) fn assembled_response_stream(
    state: &mut SmbState, com_info: &ComInfo, pdu: &[u8], com_offset: usize, which: RespStream,
) -> Option<Vec<u8>> {
    let tt = &mut state.cur_rtracker.as_mut()?.ttracker;
    let buffered = match which {
        RespStream::Params => {
            if !tt.pbuf_is_empty() {
                Some(tt.take_pbuf())
            } else {
                None
            }
        }
        RespStream::Data => {
            if !tt.dbuf_is_empty() {
                Some(tt.take_dbuf())
            } else {
                None
            }
        }
    };
    if let Some(bytes) = buffered {
        return Some(bytes);
    }

    let nb = pdu.get(com_offset..)?;
    let f = match com_info.smb_com {
        SMB1_COMMAND_TRANS | SMB1_COMMAND_TRANS2 => {
            parse_smb_trans_response_record(nb).ok()?.1.frag_fields()
        }
        SMB1_COMMAND_NT_TRANS => parse_smb_nt_transact_response_record(nb)
            .ok()?
            .1
            .frag_fields(),
        _ => return None,
    };
    let (off, cnt) = match which {
        RespStream::Params => (f.poff, f.pcnt),
        RespStream::Data => (f.doff, f.dcnt),
    };
    pdu_region(pdu, off, cnt).map(|b| b.to_vec())
}

/// Request side semantics for SMB_COM_TRANSACTION, run once the request
/// side is fully assembled.
pub(crate) fn transaction_req(state: &mut SmbState, data: &[u8], params: &[u8]) -> SmbStatus {
    let (sub_com, one_way, disconnect_tid, tid, fkey) = match state.cur_rtracker.as_ref() {
        Some(rt) => (
            rt.ttracker.subcom,
            rt.ttracker.one_way,
            rt.ttracker.disconnect_tid,
            rt.tid,
            rt.ftracker,
        ),
        None => return SmbStatus::Error,
    };

    match sub_com {
        TRANS_TRANSACT_NMPIPE | TRANS_WRITE_NMPIPE => {
            if !state.dcerpc.process_request(data) {
                return SmbStatus::Error;
            }
        }

        TRANS_SET_NMPIPE_STATE => {
            // only two parameter bytes defined, more is harmless
            if params.len() >= 2 {
                let pipe_state = u16::from_le_bytes([params[0], params[1]]);
                let byte_mode = pipe_state & PIPE_STATE_MESSAGE_MODE == 0;
                if let Some(rt) = state.cur_rtracker.as_mut() {
                    rt.ttracker.pipe_byte_mode = byte_mode;
                }
                // a one way request won't get a response; Windows applies
                // the mode right away
                if state.config.policy.is_windows() && one_way {
                    debug!(
                        "setting pipe to {} mode",
                        if byte_mode { "byte" } else { "message" }
                    );
                    if let Some(ft) = fkey.and_then(|k| state.ftrackers.get_mut(&k)) {
                        ft.fp_byte_mode = byte_mode;
                    }
                }
            }
        }

        TRANS_READ_NMPIPE => {}

        _ => {
            return SmbStatus::Ignore;
        }
    }

    if state.config.policy.is_windows() && one_way && disconnect_tid {
        state.remove_tid(tid);
    }

    SmbStatus::Success
}

/// Response side semantics for SMB_COM_TRANSACTION.
fn transaction_resp(
    state: &mut SmbState, com_info: &ComInfo, pdu: &[u8], com_offset: usize,
) -> SmbStatus {
    let (sub_com, disconnect_tid, tid, fkey, pipe_byte_mode) = match state.cur_rtracker.as_ref() {
        Some(rt) => (
            rt.ttracker.subcom,
            rt.ttracker.disconnect_tid,
            rt.tid,
            rt.ftracker,
            rt.ttracker.pipe_byte_mode,
        ),
        None => return SmbStatus::Error,
    };

    match sub_com {
        TRANS_TRANSACT_NMPIPE | TRANS_READ_NMPIPE => {
            let dbytes = match state.cur_rtracker.as_mut() {
                Some(rt) => rt.ttracker.take_dbuf(),
                None => return SmbStatus::Error,
            };
            if !dbytes.is_empty() {
                debug!("reassembled transaction response");
                let status = state.with_rpkt(dbytes, Direction::ToClient, |state, rpkt| {
                    if state.dcerpc.process_response(rpkt.data()) {
                        SmbStatus::Success
                    } else {
                        SmbStatus::Error
                    }
                });
                if status != SmbStatus::Success {
                    return status;
                }
            } else {
                let nb = match pdu.get(com_offset..) {
                    Some(nb) => nb,
                    None => return SmbStatus::Error,
                };
                let r = match parse_smb_trans_response_record(nb) {
                    Ok((_, r)) => r,
                    Err(_) => return SmbStatus::Error,
                };
                let data = match pdu_region(pdu, r.data_off as u32, r.data_cnt as u32) {
                    Some(d) => d,
                    None => return SmbStatus::Error,
                };
                if !state.dcerpc.process_response(data) {
                    return SmbStatus::Error;
                }
            }
        }

        TRANS_SET_NMPIPE_STATE => {
            debug!(
                "setting pipe to {} mode",
                if pipe_byte_mode { "byte" } else { "message" }
            );
            if let Some(ft) = fkey.and_then(|k| state.ftrackers.get_mut(&k)) {
                ft.fp_byte_mode = pipe_byte_mode;
            }
        }

        TRANS_WRITE_NMPIPE => {}

        _ => {
            return SmbStatus::Error;
        }
    }

    if disconnect_tid {
        state.remove_tid(tid);
    }

    SmbStatus::Success
}

/// SMB_COM_TRANSACTION entry point.
pub fn smb_transaction(
    state: &mut SmbState, hdr: &SmbNtHdr, com_info: &ComInfo, pdu: &[u8], com_offset: usize,
) -> SmbStatus {
    let in_progress = match state.cur_rtracker.as_ref() {
        Some(rt) => !rt.ttracker.is_complete(),
        None => return SmbStatus::Error,
    };

    // a matching request while one is in progress isn't inspected, but
    // the tracker stays
    if com_info.is_request() && in_progress {
        debug!("new transaction request matching one in progress, not inspecting");
        return SmbStatus::Error;
    }

    // \PIPE\LANMAN requests use a different word count; skip them
    if com_info.is_request() && com_info.word_count != 16 {
        debug!("\\PIPE\\LANMAN request, not inspecting");
        return SmbStatus::Ignore;
    }

    if !com_info.can_process() {
        return SmbStatus::Error;
    }

    // the server acks a partial primary with an interim response and
    // waits for secondaries
    if com_info.is_response() && com_info.com_size == SMB_COM_SIZE_INTERIM_RESP {
        debug!("server transaction interim response");
        return SmbStatus::Success;
    }

    if com_info.is_request() {
        match update_trans_request(state, hdr, com_info, pdu, com_offset) {
            TransStatus::Full => {}
            s => return s.into_smb_status(),
        }

        // whole request in one PDU: hand the streams over straight from it
        let nb = match pdu.get(com_offset..) {
            Some(nb) => nb,
            None => return SmbStatus::Error,
        };
        let r = match parse_smb_trans_request_record(nb) {
            Ok((_, r)) => r,
            Err(_) => return SmbStatus::Error,
        };
        let data = pdu_region(pdu, r.data_off as u32, r.data_cnt as u32).unwrap_or(&[]);
        let params = pdu_region(pdu, r.param_off as u32, r.param_cnt as u32).unwrap_or(&[]);
        transaction_req(state, data, params)
    } else {
        match update_trans_response(state, hdr, com_info, pdu, com_offset) {
            TransStatus::Full => {}
            s => return s.into_smb_status(),
        }
        transaction_resp(state, com_info, pdu, com_offset)
    }
}

/// SMB_COM_TRANSACTION_SECONDARY entry point.
pub fn smb_transaction_secondary(
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
        TRANS_TRANSACT_NMPIPE | TRANS_WRITE_NMPIPE => {
            debug!("reassembled transaction request");
            state.with_rpkt(dbytes, Direction::ToServer, |state, rpkt| {
                transaction_req(state, rpkt.data(), &pbytes)
            })
        }
        _ => transaction_req(state, &dbytes, &pbytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smb::dcerpc::test_support::SinkDcerpc;
    use crate::smb::smb::{MessageType, SmbConfig, SmbPolicy, SmbState};

    pub(crate) const HDR_LEN: usize = 32;

    pub(crate) fn put(pdu: &mut Vec<u8>, off: usize, bytes: &[u8]) {
        if pdu.len() < off + bytes.len() {
            pdu.resize(off + bytes.len(), 0);
        }
        pdu[off..off + bytes.len()].copy_from_slice(bytes);
    }

    struct TransReq {
        subcom: u16,
        fid: u16,
        flags: u16,
        tdcnt: u16,
        tpcnt: u16,
        dcnt: u16,
        doff: u16,
        pcnt: u16,
        poff: u16,
        setup_cnt: u8,
        name: &'static [u8],
    }

    impl Default for TransReq {
        fn default() -> TransReq {
            TransReq {
                subcom: TRANS_TRANSACT_NMPIPE,
                fid: 0x4000,
                flags: 0,
                tdcnt: 0,
                tpcnt: 0,
                dcnt: 0,
                doff: 0,
                pcnt: 0,
                poff: 0,
                setup_cnt: 2,
                name: b"\\PIPE\\\x00",
            }
        }
    }

    fn build_trans_primary(req: &TransReq) -> Vec<u8> {
        let mut pdu = vec![0u8; HDR_LEN];
        let mut b = Vec::new();
        b.push(16u8); // word count
        b.extend_from_slice(&req.tpcnt.to_le_bytes());
        b.extend_from_slice(&req.tdcnt.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes()); // max param count
        b.extend_from_slice(&1024u16.to_le_bytes()); // max data count
        b.push(0); // max setup count
        b.push(0); // reserved
        b.extend_from_slice(&req.flags.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes()); // timeout
        b.extend_from_slice(&0u16.to_le_bytes()); // reserved
        b.extend_from_slice(&req.pcnt.to_le_bytes());
        b.extend_from_slice(&req.poff.to_le_bytes());
        b.extend_from_slice(&req.dcnt.to_le_bytes());
        b.extend_from_slice(&req.doff.to_le_bytes());
        b.push(req.setup_cnt);
        b.push(0); // reserved
        b.extend_from_slice(&req.subcom.to_le_bytes());
        b.extend_from_slice(&req.fid.to_le_bytes());
        // byte count, patched by com_info in the tests
        b.extend_from_slice(&0u16.to_le_bytes());
        put(&mut pdu, HDR_LEN, &b);
        put(&mut pdu, HDR_LEN + 35, req.name);
        pdu
    }

    fn build_trans_secondary(
        tdcnt: u16, tpcnt: u16, dcnt: u16, doff: u16, ddisp: u16, pcnt: u16, poff: u16, pdisp: u16,
    ) -> Vec<u8> {
        let mut pdu = vec![0u8; HDR_LEN];
        let mut b = Vec::new();
        b.push(8u8); // word count
        b.extend_from_slice(&tpcnt.to_le_bytes());
        b.extend_from_slice(&tdcnt.to_le_bytes());
        b.extend_from_slice(&pcnt.to_le_bytes());
        b.extend_from_slice(&poff.to_le_bytes());
        b.extend_from_slice(&pdisp.to_le_bytes());
        b.extend_from_slice(&dcnt.to_le_bytes());
        b.extend_from_slice(&doff.to_le_bytes());
        b.extend_from_slice(&ddisp.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes()); // byte count
        put(&mut pdu, HDR_LEN, &b);
        pdu
    }

    fn build_trans_response(
        tdcnt: u16, tpcnt: u16, dcnt: u16, doff: u16, ddisp: u16, pcnt: u16, poff: u16, pdisp: u16,
    ) -> Vec<u8> {
        let mut pdu = vec![0u8; HDR_LEN];
        let mut b = Vec::new();
        b.push(10u8); // word count
        b.extend_from_slice(&tpcnt.to_le_bytes());
        b.extend_from_slice(&tdcnt.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes()); // reserved
        b.extend_from_slice(&pcnt.to_le_bytes());
        b.extend_from_slice(&poff.to_le_bytes());
        b.extend_from_slice(&pdisp.to_le_bytes());
        b.extend_from_slice(&dcnt.to_le_bytes());
        b.extend_from_slice(&doff.to_le_bytes());
        b.extend_from_slice(&ddisp.to_le_bytes());
        b.push(0); // setup count
        b.push(0); // reserved
        b.extend_from_slice(&0u16.to_le_bytes()); // byte count
        put(&mut pdu, HDR_LEN, &b);
        pdu
    }

    fn pipe_state(policy: SmbPolicy) -> (SmbState, SinkDcerpc) {
        let mut state = SmbState::new(SmbConfig {
            policy,
            ..Default::default()
        });
        let sink = SinkDcerpc::default();
        state.dcerpc = Box::new(sink.clone());
        state.add_tree(1, true);
        state.new_file_tracker(7, 1, 0x4000);
        state.new_request_tracker(7, 1);
        (state, sink)
    }

    fn req_com_info(word_count: u8, byte_count: u16) -> ComInfo {
        ComInfo::new(SMB1_COMMAND_TRANS, MessageType::Request, word_count, byte_count)
    }

    #[test]
    fn test_set_nmpipe_state_one_way() {
        // E1: byte mode change applied immediately on a one way request
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_SET_NMPIPE_STATE,
            flags: SMB_TRANS_FLAG_NO_RESPONSE,
            tpcnt: 2,
            pcnt: 2,
            poff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[0x00, 0x00]); // byte mode: message mode bit clear
        let ci = req_com_info(16, 12);
        let hdr = SmbNtHdr::default();

        let status = smb_transaction(&mut state, &hdr, &ci, &pdu, HDR_LEN);
        assert_eq!(status, SmbStatus::Success);
        assert!(state.events.is_empty());
        let ft = &state.ftrackers[&(7, 1, 0x4000)];
        assert!(ft.fp_byte_mode);
    }

    #[test]
    fn test_transact_nmpipe_fragmented() {
        // E2: 40 bytes in the primary, 60 more in a secondary
        let (mut state, sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let payload: Vec<u8> = (0u8..100).collect();

        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 100,
            dcnt: 40,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &payload[..40]);
        let status = smb_transaction(&mut state, &hdr, &req_com_info(16, 48), &pdu, HDR_LEN);
        assert_eq!(status, SmbStatus::Success);
        assert!(sink.requests.borrow().is_empty());
        {
            let tt = &state.cur_rtracker.as_ref().unwrap().ttracker;
            assert_eq!(tt.dsent, 40);
            assert_eq!(tt.tdcnt, 100);
        }

        let mut pdu2 = build_trans_secondary(100, 0, 60, 0x43, 40, 0, 0, 0);
        put(&mut pdu2, 0x43, &payload[40..]);
        let ci2 = ComInfo::new(SMB1_COMMAND_TRANS_SECONDARY, MessageType::Request, 8, 62);
        let status = smb_transaction_secondary(&mut state, &hdr, &ci2, &pdu2, HDR_LEN);
        assert_eq!(status, SmbStatus::Success);
        assert_eq!(sink.requests.borrow().len(), 1);
        assert_eq!(sink.requests.borrow()[0], payload);
    }

    #[test]
    fn test_fragment_split_matches_single_shot() {
        // three way split reassembles to the same bytes as one secondary
        let (mut state, sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let payload: Vec<u8> = (0u8..90).collect();

        let pdu = build_trans_primary(&TransReq {
            subcom: TRANS_WRITE_NMPIPE,
            tdcnt: 90,
            ..Default::default()
        });
        let status = smb_transaction(&mut state, &hdr, &req_com_info(16, 10), &pdu, HDR_LEN);
        assert_eq!(status, SmbStatus::Success);
        assert_eq!(state.events, vec![SmbEvent::UnusualCommandUsed]);

        for (disp, chunk) in [(0u16, &payload[..30]), (30, &payload[30..55]), (55, &payload[55..])]
        {
            let dcnt = chunk.len() as u16;
            let mut pdu = build_trans_secondary(90, 0, dcnt, 0x43, disp, 0, 0, 0);
            put(&mut pdu, 0x43, chunk);
            let ci = ComInfo::new(SMB1_COMMAND_TRANS_SECONDARY, MessageType::Request, 8, dcnt + 2);
            let status = smb_transaction_secondary(&mut state, &hdr, &ci, &pdu, HDR_LEN);
            assert_eq!(status, SmbStatus::Success);
        }
        assert_eq!(sink.requests.borrow().len(), 1);
        assert_eq!(sink.requests.borrow()[0], payload);
    }

    #[test]
    fn test_samba_name_check_fails() {
        // E3: transaction name must be \PIPE\ under Samba policy
        let (mut state, _sink) = pipe_state(SmbPolicy::Samba);
        let pdu = build_trans_primary(&TransReq {
            subcom: TRANS_SET_NMPIPE_STATE,
            tpcnt: 2,
            pcnt: 2,
            poff: 80,
            name: b"\\MAILSLOT\\X\x00",
            ..Default::default()
        });
        let status = smb_transaction(
            &mut state,
            &SmbNtHdr::default(),
            &req_com_info(16, 16),
            &pdu,
            HDR_LEN,
        );
        assert_eq!(status, SmbStatus::Error);
        // request tracker state untouched
        let tt = &state.cur_rtracker.as_ref().unwrap().ttracker;
        assert_eq!(tt.side, TransSide::None);
        assert_eq!(tt.psent, 0);
    }

    #[test]
    fn test_invalid_setup_count() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let pdu = build_trans_primary(&TransReq {
            subcom: TRANS_SET_NMPIPE_STATE,
            setup_cnt: 3,
            tpcnt: 2,
            pcnt: 2,
            poff: 70,
            ..Default::default()
        });
        let status = smb_transaction(
            &mut state,
            &SmbNtHdr::default(),
            &req_com_info(16, 12),
            &pdu,
            HDR_LEN,
        );
        assert_eq!(status, SmbStatus::Error);
        assert!(state.events.contains(&SmbEvent::InvalidSetupCount));
    }

    #[test]
    fn test_lanman_word_count_ignored() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let pdu = build_trans_primary(&TransReq::default());
        let status = smb_transaction(
            &mut state,
            &SmbNtHdr::default(),
            &req_com_info(14, 12),
            &pdu,
            HDR_LEN,
        );
        assert_eq!(status, SmbStatus::Ignore);
    }

    #[test]
    fn test_request_while_in_progress_rejected() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let payload = [0xaa_u8; 40];
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 100,
            dcnt: 40,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &payload);
        let ci = req_com_info(16, 48);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &ci, &pdu, HDR_LEN),
            SmbStatus::Success
        );

        // exact same primary again: rejected, tracker untouched
        assert_eq!(
            smb_transaction(&mut state, &hdr, &ci, &pdu, HDR_LEN),
            SmbStatus::Error
        );
        let tt = &state.cur_rtracker.as_ref().unwrap().ttracker;
        assert_eq!(tt.dsent, 40);
        assert_eq!(tt.tdcnt, 100);
        assert_eq!(tt.dbuf.as_ref().unwrap().filled(), 40);
    }

    #[test]
    fn test_interim_response_is_noop() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 100,
            dcnt: 40,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[0x11; 40]);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &req_com_info(16, 48), &pdu, HDR_LEN),
            SmbStatus::Success
        );

        let interim = ComInfo::new(SMB1_COMMAND_TRANS, MessageType::Response, 0, 0);
        let pdu2 = vec![0u8; HDR_LEN + 3];
        assert_eq!(
            smb_transaction(&mut state, &hdr, &interim, &pdu2, HDR_LEN),
            SmbStatus::Success
        );
        let tt = &state.cur_rtracker.as_ref().unwrap().ttracker;
        assert_eq!(tt.side, TransSide::Request);
        assert_eq!(tt.dsent, 40);
    }

    #[test]
    fn test_windows_ignores_secondary_totals() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 100,
            dcnt: 40,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[0x22; 40]);
        smb_transaction(&mut state, &hdr, &req_com_info(16, 48), &pdu, HDR_LEN);

        // the secondary claims a smaller total; Windows sticks with 100
        let mut pdu2 = build_trans_secondary(50, 0, 10, 0x43, 40, 0, 0, 0);
        put(&mut pdu2, 0x43, &[0x33; 10]);
        let ci2 = ComInfo::new(SMB1_COMMAND_TRANS_SECONDARY, MessageType::Request, 8, 12);
        assert_eq!(
            smb_transaction_secondary(&mut state, &hdr, &ci2, &pdu2, HDR_LEN),
            SmbStatus::Success
        );
        let tt = &state.cur_rtracker.as_ref().unwrap().ttracker;
        assert_eq!(tt.tdcnt, 100);
        assert_eq!(tt.dsent, 50);
    }

    #[test]
    fn test_samba_lowers_secondary_totals() {
        let (mut state, sink) = pipe_state(SmbPolicy::Samba);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 100,
            dcnt: 40,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[0x22; 40]);
        smb_transaction(&mut state, &hdr, &req_com_info(16, 48), &pdu, HDR_LEN);

        // lowering the total to what already arrived completes the side
        let pdu2 = build_trans_secondary(40, 0, 0, 0, 40, 0, 0, 0);
        let ci2 = ComInfo::new(SMB1_COMMAND_TRANS_SECONDARY, MessageType::Request, 8, 2);
        assert_eq!(
            smb_transaction_secondary(&mut state, &hdr, &ci2, &pdu2, HDR_LEN),
            SmbStatus::Success
        );
        assert_eq!(sink.requests.borrow().len(), 1);
        assert_eq!(sink.requests.borrow()[0].len(), 40);
    }

    #[test]
    fn test_secondary_overshoot_ignored() {
        // an overlapping Samba fragment whose displacement fits the total
        // but whose cumulative progress would overshoot it
        let (mut state, _sink) = pipe_state(SmbPolicy::Samba);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 100,
            dcnt: 40,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[0x22; 40]);
        smb_transaction(&mut state, &hdr, &req_com_info(16, 48), &pdu, HDR_LEN);

        let mut pdu2 = build_trans_secondary(100, 0, 70, 0x43, 30, 0, 0, 0);
        put(&mut pdu2, 0x43, &[0x44; 70]);
        let ci2 = ComInfo::new(SMB1_COMMAND_TRANS_SECONDARY, MessageType::Request, 8, 72);
        assert_eq!(
            smb_transaction_secondary(&mut state, &hdr, &ci2, &pdu2, HDR_LEN),
            SmbStatus::Ignore
        );
        let tt = &state.cur_rtracker.as_ref().unwrap().ttracker;
        assert_eq!(tt.dsent, 40);

        // with the displacement past the total the fragment is structural
        // garbage instead
        let mut pdu3 = build_trans_secondary(100, 0, 80, 0x43, 40, 0, 0, 0);
        put(&mut pdu3, 0x43, &[0x44; 80]);
        let ci3 = ComInfo::new(SMB1_COMMAND_TRANS_SECONDARY, MessageType::Request, 8, 82);
        assert_eq!(
            smb_transaction_secondary(&mut state, &hdr, &ci3, &pdu3, HDR_LEN),
            SmbStatus::Error
        );
    }

    #[test]
    fn test_windows_displacement_overlap_rejected() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 100,
            dcnt: 40,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[0x22; 40]);
        smb_transaction(&mut state, &hdr, &req_com_info(16, 48), &pdu, HDR_LEN);

        // displacement 30 rewinds into already received bytes
        let mut pdu2 = build_trans_secondary(100, 0, 20, 0x43, 30, 0, 0, 0);
        put(&mut pdu2, 0x43, &[0x55; 20]);
        let ci2 = ComInfo::new(SMB1_COMMAND_TRANS_SECONDARY, MessageType::Request, 8, 22);
        assert_eq!(
            smb_transaction_secondary(&mut state, &hdr, &ci2, &pdu2, HDR_LEN),
            SmbStatus::Error
        );
    }

    #[test]
    fn test_unknown_subcom_ignored_no_mutation() {
        let (mut state, sink) = pipe_state(SmbPolicy::Windows);
        let pdu = build_trans_primary(&TransReq {
            subcom: TRANS_QUERY_NMPIPE_INFO,
            ..Default::default()
        });
        let status = smb_transaction(
            &mut state,
            &SmbNtHdr::default(),
            &req_com_info(16, 10),
            &pdu,
            HDR_LEN,
        );
        assert_eq!(status, SmbStatus::Ignore);
        assert!(sink.requests.borrow().is_empty());
        assert!(state.events.is_empty());
        assert_eq!(state.cur_rtracker.as_ref().unwrap().ttracker.side, TransSide::None);
    }

    #[test]
    fn test_deprecated_subcom_alerts() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let pdu = build_trans_primary(&TransReq {
            subcom: TRANS_RAW_WRITE_NMPIPE,
            ..Default::default()
        });
        let status = smb_transaction(
            &mut state,
            &SmbNtHdr::default(),
            &req_com_info(16, 10),
            &pdu,
            HDR_LEN,
        );
        assert_eq!(status, SmbStatus::Ignore);
        assert_eq!(state.events, vec![SmbEvent::DeprecatedCommandUsed]);
    }

    #[test]
    fn test_unknown_fid_ignored() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            fid: 0x9999,
            ..Default::default()
        });
        let status = smb_transaction(
            &mut state,
            &SmbNtHdr::default(),
            &req_com_info(16, 10),
            &pdu,
            HDR_LEN,
        );
        assert_eq!(status, SmbStatus::Ignore);
    }

    #[test]
    fn test_byte_mode_pipe_refuses_transact() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        state
            .ftrackers
            .get_mut(&(7, 1, 0x4000))
            .unwrap()
            .fp_byte_mode = true;
        let pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 4,
            dcnt: 4,
            doff: 70,
            ..Default::default()
        });
        let status = smb_transaction(
            &mut state,
            &SmbNtHdr::default(),
            &req_com_info(16, 12),
            &pdu,
            HDR_LEN,
        );
        assert_eq!(status, SmbStatus::Error);
    }

    #[test]
    fn test_transact_nmpipe_response_single_pdu() {
        // request completes, then a one PDU response flows to dcerpc
        let (mut state, sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 4,
            dcnt: 4,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[1, 2, 3, 4]);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &req_com_info(16, 12), &pdu, HDR_LEN),
            SmbStatus::Success
        );
        assert_eq!(sink.requests.borrow().len(), 1);

        let mut resp = build_trans_response(8, 0, 8, 0x40, 0, 0, 0, 0);
        put(&mut resp, 0x40, &[9, 8, 7, 6, 5, 4, 3, 2]);
        let ci = ComInfo::new(SMB1_COMMAND_TRANS, MessageType::Response, 10, 10);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &ci, &resp, HDR_LEN),
            SmbStatus::Success
        );
        assert_eq!(sink.responses.borrow().len(), 1);
        assert_eq!(sink.responses.borrow()[0], vec![9, 8, 7, 6, 5, 4, 3, 2]);
    }

    #[test]
    fn test_transact_nmpipe_response_fragmented() {
        let (mut state, sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 4,
            dcnt: 4,
            doff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[1, 2, 3, 4]);
        smb_transaction(&mut state, &hdr, &req_com_info(16, 12), &pdu, HDR_LEN);

        let payload: Vec<u8> = (100u8..160).collect();
        let ci = ComInfo::new(SMB1_COMMAND_TRANS, MessageType::Response, 10, 42);
        let mut r1 = build_trans_response(60, 0, 40, 0x40, 0, 0, 0, 0);
        put(&mut r1, 0x40, &payload[..40]);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &ci, &r1, HDR_LEN),
            SmbStatus::Success
        );
        assert!(sink.responses.borrow().is_empty());

        let mut r2 = build_trans_response(60, 0, 20, 0x40, 40, 0, 0, 0);
        put(&mut r2, 0x40, &payload[40..]);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &ci, &r2, HDR_LEN),
            SmbStatus::Success
        );
        assert_eq!(sink.responses.borrow().len(), 1);
        assert_eq!(sink.responses.borrow()[0], payload);
    }

    #[test]
    fn test_set_nmpipe_state_committed_on_response() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        // two way request: mode not applied yet
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_SET_NMPIPE_STATE,
            tpcnt: 2,
            pcnt: 2,
            poff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[0x00, 0x00]);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &req_com_info(16, 12), &pdu, HDR_LEN),
            SmbStatus::Success
        );
        assert!(!state.ftrackers[&(7, 1, 0x4000)].fp_byte_mode);

        // the response commits it
        let resp = build_trans_response(0, 0, 0, 0, 0, 0, 0, 0);
        let ci = ComInfo::new(SMB1_COMMAND_TRANS, MessageType::Response, 10, 0);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &ci, &resp, HDR_LEN),
            SmbStatus::Success
        );
        assert!(state.ftrackers[&(7, 1, 0x4000)].fp_byte_mode);
    }

    #[test]
    fn test_disconnect_tid_on_response() {
        let (mut state, _sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_SET_NMPIPE_STATE,
            flags: SMB_TRANS_FLAG_DISCONNECT_TID,
            tpcnt: 2,
            pcnt: 2,
            poff: 70,
            ..Default::default()
        });
        put(&mut pdu, 70, &[0x00, 0x01]); // message mode
        smb_transaction(&mut state, &hdr, &req_com_info(16, 12), &pdu, HDR_LEN);

        let resp = build_trans_response(0, 0, 0, 0, 0, 0, 0, 0);
        let ci = ComInfo::new(SMB1_COMMAND_TRANS, MessageType::Response, 10, 0);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &ci, &resp, HDR_LEN),
            SmbStatus::Success
        );
        // the whole tree is gone
        assert!(state.ftrackers.is_empty());
        assert!(!state.is_tid_ipc(1));
    }

    #[test]
    fn test_validate_fields_rejections() {
        let pdu = vec![0u8; 64];
        let ok = TransFragFields {
            tdcnt: 10,
            dcnt: 10,
            doff: 40,
            ..Default::default()
        };
        assert!(validate_transaction_fields(&pdu, 20, &ok).is_ok());

        // alignment padding earns the counts a little slack over the
        // byte count, but no more than that
        assert!(validate_transaction_fields(&pdu, 10 - TRANS_PAD_ALLOWANCE as u16, &ok).is_ok());
        assert!(
            validate_transaction_fields(&pdu, 10 - TRANS_PAD_ALLOWANCE as u16 - 1, &ok).is_err()
        );
        // region past the end of the pdu
        let past = TransFragFields {
            doff: 60,
            ..ok
        };
        assert!(validate_transaction_fields(&pdu, 20, &past).is_err());
        // displacement past the declared total
        let disp = TransFragFields {
            ddisp: 5,
            ..ok
        };
        assert!(validate_transaction_fields(&pdu, 20, &disp).is_err());
        // nonzero count but offset zero
        let zoff = TransFragFields {
            doff: 0,
            ..ok
        };
        assert!(validate_transaction_fields(&pdu, 20, &zoff).is_err());
    }

    #[test]
    fn test_byte_count_padding_allowance() {
        // data region sits two pad bytes past the name; a byte count a
        // couple bytes short of the counts is still within the allowance
        let (mut state, sink) = pipe_state(SmbPolicy::Windows);
        let hdr = SmbNtHdr::default();
        let mut pdu = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 4,
            dcnt: 4,
            doff: 72,
            ..Default::default()
        });
        put(&mut pdu, 72, &[1, 2, 3, 4]);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &req_com_info(16, 2), &pdu, HDR_LEN),
            SmbStatus::Success
        );
        assert_eq!(sink.requests.borrow().len(), 1);
        assert_eq!(sink.requests.borrow()[0], vec![1, 2, 3, 4]);

        // past the allowance the fragment is structural garbage
        state.new_request_tracker(7, 1);
        let mut pdu2 = build_trans_primary(&TransReq {
            subcom: TRANS_TRANSACT_NMPIPE,
            tdcnt: 12,
            dcnt: 12,
            doff: 72,
            ..Default::default()
        });
        put(&mut pdu2, 72, &[0; 12]);
        assert_eq!(
            smb_transaction(&mut state, &hdr, &req_com_info(16, 2), &pdu2, HDR_LEN),
            SmbStatus::Error
        );
    }

    #[test]
    fn test_validate_sent() {
        assert!(validate_transaction_sent(40, 60, 100, 0, 0, 0).is_ok());
        assert!(validate_transaction_sent(40, 61, 100, 0, 0, 0).is_err());
        assert!(validate_transaction_sent(0, 0, 0, 2, 1, 2).is_err());
    }
}
