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

//! Wire records for the SMB1 transaction command families.
//!
//! All multi byte integers are little endian; offsets on the wire are
//! measured from the start of the SMB header.

use nom::bytes::streaming::take;
use nom::number::streaming::{le_u16, le_u32, le_u64, le_u8};
use nom::IResult;
use num_derive::FromPrimitive;

// SMB_COM_TRANSACTION subcommands
// https://msdn.microsoft.com/en-us/library/ee441557.aspx
pub const TRANS_SET_NMPIPE_STATE: u16 = 0x0001;
pub const TRANS_RAW_READ_NMPIPE: u16 = 0x0011;
pub const TRANS_QUERY_NMPIPE_STATE: u16 = 0x0021;
pub const TRANS_QUERY_NMPIPE_INFO: u16 = 0x0022;
pub const TRANS_PEEK_NMPIPE: u16 = 0x0023;
pub const TRANS_TRANSACT_NMPIPE: u16 = 0x0026;
pub const TRANS_RAW_WRITE_NMPIPE: u16 = 0x0031;
pub const TRANS_READ_NMPIPE: u16 = 0x0036;
pub const TRANS_WRITE_NMPIPE: u16 = 0x0037;
pub const TRANS_WAIT_NMPIPE: u16 = 0x0053;
pub const TRANS_CALL_NMPIPE: u16 = 0x0054;
pub const TRANS_SUBCOM_MAX: u16 = 0x0055;

// SMB_COM_TRANSACTION2 subcommands
pub const TRANS2_OPEN2: u16 = 0x0000;
pub const TRANS2_FIND_FIRST2: u16 = 0x0001;
pub const TRANS2_FIND_NEXT2: u16 = 0x0002;
pub const TRANS2_QUERY_FS_INFORMATION: u16 = 0x0003;
pub const TRANS2_SET_FS_INFORMATION: u16 = 0x0004;
pub const TRANS2_QUERY_PATH_INFORMATION: u16 = 0x0005;
pub const TRANS2_SET_PATH_INFORMATION: u16 = 0x0006;
pub const TRANS2_QUERY_FILE_INFORMATION: u16 = 0x0007;
pub const TRANS2_SET_FILE_INFORMATION: u16 = 0x0008;
pub const TRANS2_FSCTL: u16 = 0x0009;
pub const TRANS2_IOCTL2: u16 = 0x000a;
pub const TRANS2_FIND_NOTIFY_FIRST: u16 = 0x000b;
pub const TRANS2_FIND_NOTIFY_NEXT: u16 = 0x000c;
pub const TRANS2_CREATE_DIRECTORY: u16 = 0x000d;
pub const TRANS2_SESSION_SETUP: u16 = 0x000e;
pub const TRANS2_GET_DFS_REFERRAL: u16 = 0x0010;
pub const TRANS2_REPORT_DFS_INCONSISTENCY: u16 = 0x0011;
pub const TRANS2_SUBCOM_MAX: u16 = 0x0012;

// SMB_COM_NT_TRANSACT subcommands
pub const NT_TRANSACT_CREATE: u16 = 0x0001;
pub const NT_TRANSACT_IOCTL: u16 = 0x0002;
pub const NT_TRANSACT_SET_SECURITY_DESC: u16 = 0x0003;
pub const NT_TRANSACT_NOTIFY_CHANGE: u16 = 0x0004;
pub const NT_TRANSACT_RENAME: u16 = 0x0005;
pub const NT_TRANSACT_QUERY_SECURITY_DESC: u16 = 0x0006;
pub const NT_TRANSACT_SUBCOM_MAX: u16 = 0x0007;

// SMB_COM_TRANSACTION request Flags bits
pub const SMB_TRANS_FLAG_DISCONNECT_TID: u16 = 0x0001;
pub const SMB_TRANS_FLAG_NO_RESPONSE: u16 = 0x0002;

// File attribute bits shared by the 16 bit and extended 32 bit encodings
pub const SMB_FILE_ATTRIBUTE_READONLY: u32 = 0x0001;
pub const SMB_FILE_ATTRIBUTE_HIDDEN: u32 = 0x0002;
pub const SMB_FILE_ATTRIBUTE_SYSTEM: u32 = 0x0004;
pub const SMB_FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0010;

pub const SMB_RESOURCE_TYPE_DISK: u16 = 0x0000;

// NT create CreateOptions bit: file will only be read/written sequentially
pub const SMB_CREATE_OPTIONS_SEQUENTIAL_ONLY: u32 = 0x0000_0004;

// CreateAction / OpenResults: an existing file was opened
pub const SMB_CREATE_ACTION_FILE_OPENED: u32 = 0x0000_0001;

// SET_NMPIPE_STATE parameter bit selecting message mode reads
pub const PIPE_STATE_MESSAGE_MODE: u16 = 0x0100;

pub fn smb_file_attrs_directory(attrs: u32) -> bool {
    attrs & SMB_FILE_ATTRIBUTE_DIRECTORY != 0
}

pub fn smb_resource_type_disk(resource_type: u16) -> bool {
    resource_type == SMB_RESOURCE_TYPE_DISK
}

/// OpenResults low bits say what the server did; 1 means an existing file
/// was opened, i.e. a read is coming.
pub fn smb_open_result_read(action_taken: u16) -> bool {
    action_taken & 0x0003 == 0x0001
}

pub fn smb_create_action_read(create_action: u32) -> bool {
    create_action == SMB_CREATE_ACTION_FILE_OPENED
}

/// Subcommand names, for log lines only.
pub fn smb_trans_subcom_string(subcom: u16) -> String {
    match subcom {
        TRANS_SET_NMPIPE_STATE => "TRANS_SET_NMPIPE_STATE",
        TRANS_RAW_READ_NMPIPE => "TRANS_RAW_READ_NMPIPE",
        TRANS_QUERY_NMPIPE_STATE => "TRANS_QUERY_NMPIPE_STATE",
        TRANS_QUERY_NMPIPE_INFO => "TRANS_QUERY_NMPIPE_INFO",
        TRANS_PEEK_NMPIPE => "TRANS_PEEK_NMPIPE",
        TRANS_TRANSACT_NMPIPE => "TRANS_TRANSACT_NMPIPE",
        TRANS_RAW_WRITE_NMPIPE => "TRANS_RAW_WRITE_NMPIPE",
        TRANS_READ_NMPIPE => "TRANS_READ_NMPIPE",
        TRANS_WRITE_NMPIPE => "TRANS_WRITE_NMPIPE",
        TRANS_WAIT_NMPIPE => "TRANS_WAIT_NMPIPE",
        TRANS_CALL_NMPIPE => "TRANS_CALL_NMPIPE",
        _ => {
            return format!("UNKNOWN_{:04x}", subcom);
        }
    }
    .to_string()
}

pub static SMB_TRANS2_SUBCOM_STRINGS: [&str; TRANS2_SUBCOM_MAX as usize] = [
    "TRANS2_OPEN2",
    "TRANS2_FIND_FIRST2",
    "TRANS2_FIND_NEXT2",
    "TRANS2_QUERY_FS_INFORMATION",
    "TRANS2_SET_FS_INFORMATION",
    "TRANS2_QUERY_PATH_INFORMATION",
    "TRANS2_SET_PATH_INFORMATION",
    "TRANS2_QUERY_FILE_INFORMATION",
    "TRANS2_SET_FILE_INFORMATION",
    "TRANS2_FSCTL",
    "TRANS2_IOCTL2",
    "TRANS2_FIND_NOTIFY_FIRST",
    "TRANS2_FIND_NOTIFY_NEXT",
    "TRANS2_CREATE_DIRECTORY",
    "TRANS2_SESSION_SETUP",
    "Unknown",
    "TRANS2_GET_DFS_REFERRAL",
    "TRANS2_REPORT_DFS_INCONSISTENCY",
];

pub static SMB_NT_TRANSACT_SUBCOM_STRINGS: [&str; NT_TRANSACT_SUBCOM_MAX as usize] = [
    "Unknown",
    "NT_TRANSACT_CREATE",
    "NT_TRANSACT_IOCTL",
    "NT_TRANSACT_SET_SECURITY_DESC",
    "NT_TRANSACT_NOTIFY_CHANGE",
    "NT_TRANSACT_RENAME",
    "NT_TRANSACT_QUERY_SECURITY_DESC",
];

pub fn smb_trans2_subcom_string(subcom: u16) -> String {
    match SMB_TRANS2_SUBCOM_STRINGS.get(subcom as usize) {
        Some(s) => (*s).to_string(),
        None => format!("UNKNOWN_{:04x}", subcom),
    }
}

pub fn smb_nt_transact_subcom_string(subcom: u16) -> String {
    match SMB_NT_TRANSACT_SUBCOM_STRINGS.get(subcom as usize) {
        Some(s) => (*s).to_string(),
        None => format!("UNKNOWN_{:04x}", subcom),
    }
}

/// The per fragment counts, offsets and displacements every transaction
/// record variant carries, widened to the NT_TRANSACT field width.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransFragFields {
    pub tdcnt: u32,
    pub tpcnt: u32,
    pub dcnt: u32,
    pub doff: u32,
    pub ddisp: u32,
    pub pcnt: u32,
    pub poff: u32,
    pub pdisp: u32,
}

/// SMB_COM_TRANSACTION request, word count 16.
#[derive(Debug, PartialEq, Eq)]
pub struct SmbTransactionReqRecord {
    pub total_param_cnt: u16,
    pub total_data_cnt: u16,
    pub max_param_cnt: u16,
    pub max_data_cnt: u16,
    pub max_setup_cnt: u8,
    pub flags: u16,
    pub timeout: u32,
    pub param_cnt: u16,
    pub param_off: u16,
    pub data_cnt: u16,
    pub data_off: u16,
    pub setup_cnt: u8,
    pub subcom: u16,
    pub fid: u16,
}

impl SmbTransactionReqRecord {
    pub fn disconnect_tid(&self) -> bool {
        self.flags & SMB_TRANS_FLAG_DISCONNECT_TID != 0
    }

    pub fn one_way(&self) -> bool {
        self.flags & SMB_TRANS_FLAG_NO_RESPONSE != 0
    }

    pub fn frag_fields(&self) -> TransFragFields {
        TransFragFields {
            tdcnt: self.total_data_cnt as u32,
            tpcnt: self.total_param_cnt as u32,
            dcnt: self.data_cnt as u32,
            doff: self.data_off as u32,
            ddisp: 0,
            pcnt: self.param_cnt as u32,
            poff: self.param_off as u32,
            pdisp: 0,
        }
    }
}

pub fn parse_smb_trans_request_record(i: &[u8]) -> IResult<&[u8], SmbTransactionReqRecord> {
    let (i, _wct) = le_u8(i)?;
    let (i, total_param_cnt) = le_u16(i)?;
    let (i, total_data_cnt) = le_u16(i)?;
    let (i, max_param_cnt) = le_u16(i)?;
    let (i, max_data_cnt) = le_u16(i)?;
    let (i, max_setup_cnt) = le_u8(i)?;
    let (i, _res) = le_u8(i)?;
    let (i, flags) = le_u16(i)?;
    let (i, timeout) = le_u32(i)?;
    let (i, _res2) = le_u16(i)?;
    let (i, param_cnt) = le_u16(i)?;
    let (i, param_off) = le_u16(i)?;
    let (i, data_cnt) = le_u16(i)?;
    let (i, data_off) = le_u16(i)?;
    let (i, setup_cnt) = le_u8(i)?;
    let (i, _res3) = le_u8(i)?;
    let (i, subcom) = le_u16(i)?;
    let (i, fid) = le_u16(i)?;
    Ok((
        i,
        SmbTransactionReqRecord {
            total_param_cnt,
            total_data_cnt,
            max_param_cnt,
            max_data_cnt,
            max_setup_cnt,
            flags,
            timeout,
            param_cnt,
            param_off,
            data_cnt,
            data_off,
            setup_cnt,
            subcom,
            fid,
        },
    ))
}

/// SMB_COM_TRANSACTION2 request, word count 14 + setup count.
#[derive(Debug, PartialEq, Eq)]
pub struct SmbTransaction2ReqRecord {
    pub total_param_cnt: u16,
    pub total_data_cnt: u16,
    pub max_param_cnt: u16,
    pub max_data_cnt: u16,
    pub max_setup_cnt: u8,
    pub flags: u16,
    pub timeout: u32,
    pub param_cnt: u16,
    pub param_off: u16,
    pub data_cnt: u16,
    pub data_off: u16,
    pub setup_cnt: u8,
    pub subcom: u16,
}

impl SmbTransaction2ReqRecord {
    pub fn frag_fields(&self) -> TransFragFields {
        TransFragFields {
            tdcnt: self.total_data_cnt as u32,
            tpcnt: self.total_param_cnt as u32,
            dcnt: self.data_cnt as u32,
            doff: self.data_off as u32,
            ddisp: 0,
            pcnt: self.param_cnt as u32,
            poff: self.param_off as u32,
            pdisp: 0,
        }
    }
}

pub fn parse_smb_trans2_request_record(i: &[u8]) -> IResult<&[u8], SmbTransaction2ReqRecord> {
    let (i, _wct) = le_u8(i)?;
    let (i, total_param_cnt) = le_u16(i)?;
    let (i, total_data_cnt) = le_u16(i)?;
    let (i, max_param_cnt) = le_u16(i)?;
    let (i, max_data_cnt) = le_u16(i)?;
    let (i, max_setup_cnt) = le_u8(i)?;
    let (i, _res) = le_u8(i)?;
    let (i, flags) = le_u16(i)?;
    let (i, timeout) = le_u32(i)?;
    let (i, _res2) = le_u16(i)?;
    let (i, param_cnt) = le_u16(i)?;
    let (i, param_off) = le_u16(i)?;
    let (i, data_cnt) = le_u16(i)?;
    let (i, data_off) = le_u16(i)?;
    let (i, setup_cnt) = le_u8(i)?;
    let (i, _res3) = le_u8(i)?;
    let (i, subcom) = le_u16(i)?;
    Ok((
        i,
        SmbTransaction2ReqRecord {
            total_param_cnt,
            total_data_cnt,
            max_param_cnt,
            max_data_cnt,
            max_setup_cnt,
            flags,
            timeout,
            param_cnt,
            param_off,
            data_cnt,
            data_off,
            setup_cnt,
            subcom,
        },
    ))
}

/// SMB_COM_NT_TRANSACT request, word count 19 + setup count.
#[derive(Debug, PartialEq, Eq)]
pub struct SmbNtTransactReqRecord {
    pub max_setup_cnt: u8,
    pub total_param_cnt: u32,
    pub total_data_cnt: u32,
    pub max_param_cnt: u32,
    pub max_data_cnt: u32,
    pub param_cnt: u32,
    pub param_off: u32,
    pub data_cnt: u32,
    pub data_off: u32,
    pub setup_cnt: u8,
    pub subcom: u16,
}

impl SmbNtTransactReqRecord {
    pub fn frag_fields(&self) -> TransFragFields {
        TransFragFields {
            tdcnt: self.total_data_cnt,
            tpcnt: self.total_param_cnt,
            dcnt: self.data_cnt,
            doff: self.data_off,
            ddisp: 0,
            pcnt: self.param_cnt,
            poff: self.param_off,
            pdisp: 0,
        }
    }
}

pub fn parse_smb_nt_transact_request_record(i: &[u8]) -> IResult<&[u8], SmbNtTransactReqRecord> {
    let (i, _wct) = le_u8(i)?;
    let (i, max_setup_cnt) = le_u8(i)?;
    let (i, _res) = take(2_usize)(i)?;
    let (i, total_param_cnt) = le_u32(i)?;
    let (i, total_data_cnt) = le_u32(i)?;
    let (i, max_param_cnt) = le_u32(i)?;
    let (i, max_data_cnt) = le_u32(i)?;
    let (i, param_cnt) = le_u32(i)?;
    let (i, param_off) = le_u32(i)?;
    let (i, data_cnt) = le_u32(i)?;
    let (i, data_off) = le_u32(i)?;
    let (i, setup_cnt) = le_u8(i)?;
    let (i, subcom) = le_u16(i)?;
    Ok((
        i,
        SmbNtTransactReqRecord {
            max_setup_cnt,
            total_param_cnt,
            total_data_cnt,
            max_param_cnt,
            max_data_cnt,
            param_cnt,
            param_off,
            data_cnt,
            data_off,
            setup_cnt,
            subcom,
        },
    ))
}

/// SMB_COM_TRANSACTION_SECONDARY request, word count 8.
#[derive(Debug, PartialEq, Eq)]
pub struct SmbTransactionSecondaryReqRecord {
    pub total_param_cnt: u16,
    pub total_data_cnt: u16,
    pub param_cnt: u16,
    pub param_off: u16,
    pub param_disp: u16,
    pub data_cnt: u16,
    pub data_off: u16,
    pub data_disp: u16,
}

impl SmbTransactionSecondaryReqRecord {
    pub fn frag_fields(&self) -> TransFragFields {
        TransFragFields {
            tdcnt: self.total_data_cnt as u32,
            tpcnt: self.total_param_cnt as u32,
            dcnt: self.data_cnt as u32,
            doff: self.data_off as u32,
            ddisp: self.data_disp as u32,
            pcnt: self.param_cnt as u32,
            poff: self.param_off as u32,
            pdisp: self.param_disp as u32,
        }
    }
}

pub fn parse_smb_trans_secondary_record(
    i: &[u8],
) -> IResult<&[u8], SmbTransactionSecondaryReqRecord> {
    let (i, _wct) = le_u8(i)?;
    let (i, total_param_cnt) = le_u16(i)?;
    let (i, total_data_cnt) = le_u16(i)?;
    let (i, param_cnt) = le_u16(i)?;
    let (i, param_off) = le_u16(i)?;
    let (i, param_disp) = le_u16(i)?;
    let (i, data_cnt) = le_u16(i)?;
    let (i, data_off) = le_u16(i)?;
    let (i, data_disp) = le_u16(i)?;
    Ok((
        i,
        SmbTransactionSecondaryReqRecord {
            total_param_cnt,
            total_data_cnt,
            param_cnt,
            param_off,
            param_disp,
            data_cnt,
            data_off,
            data_disp,
        },
    ))
}

/// SMB_COM_TRANSACTION2_SECONDARY request, word count 9. Same as the
/// TRANSACTION variant with a trailing FID.
#[derive(Debug, PartialEq, Eq)]
pub struct SmbTransaction2SecondaryReqRecord {
    pub total_param_cnt: u16,
    pub total_data_cnt: u16,
    pub param_cnt: u16,
    pub param_off: u16,
    pub param_disp: u16,
    pub data_cnt: u16,
    pub data_off: u16,
    pub data_disp: u16,
    pub fid: u16,
}

impl SmbTransaction2SecondaryReqRecord {
    pub fn frag_fields(&self) -> TransFragFields {
        TransFragFields {
            tdcnt: self.total_data_cnt as u32,
            tpcnt: self.total_param_cnt as u32,
            dcnt: self.data_cnt as u32,
            doff: self.data_off as u32,
            ddisp: self.data_disp as u32,
            pcnt: self.param_cnt as u32,
            poff: self.param_off as u32,
            pdisp: self.param_disp as u32,
        }
    }
}

pub fn parse_smb_trans2_secondary_record(
    i: &[u8],
) -> IResult<&[u8], SmbTransaction2SecondaryReqRecord> {
    let (i, _wct) = le_u8(i)?;
    let (i, total_param_cnt) = le_u16(i)?;
    let (i, total_data_cnt) = le_u16(i)?;
    let (i, param_cnt) = le_u16(i)?;
    let (i, param_off) = le_u16(i)?;
    let (i, param_disp) = le_u16(i)?;
    let (i, data_cnt) = le_u16(i)?;
    let (i, data_off) = le_u16(i)?;
    let (i, data_disp) = le_u16(i)?;
    let (i, fid) = le_u16(i)?;
    Ok((
        i,
        SmbTransaction2SecondaryReqRecord {
            total_param_cnt,
            total_data_cnt,
            param_cnt,
            param_off,
            param_disp,
            data_cnt,
            data_off,
            data_disp,
            fid,
        },
    ))
}

/// SMB_COM_NT_TRANSACT_SECONDARY request, word count 18.
#[derive(Debug, PartialEq, Eq)]
pub struct SmbNtTransactSecondaryReqRecord {
    pub total_param_cnt: u32,
    pub total_data_cnt: u32,
    pub param_cnt: u32,
    pub param_off: u32,
    pub param_disp: u32,
    pub data_cnt: u32,
    pub data_off: u32,
    pub data_disp: u32,
}

impl SmbNtTransactSecondaryReqRecord {
    pub fn frag_fields(&self) -> TransFragFields {
        TransFragFields {
            tdcnt: self.total_data_cnt,
            tpcnt: self.total_param_cnt,
            dcnt: self.data_cnt,
            doff: self.data_off,
            ddisp: self.data_disp,
            pcnt: self.param_cnt,
            poff: self.param_off,
            pdisp: self.param_disp,
        }
    }
}

pub fn parse_smb_nt_transact_secondary_record(
    i: &[u8],
) -> IResult<&[u8], SmbNtTransactSecondaryReqRecord> {
    let (i, _wct) = le_u8(i)?;
    let (i, _res) = take(3_usize)(i)?;
    let (i, total_param_cnt) = le_u32(i)?;
    let (i, total_data_cnt) = le_u32(i)?;
    let (i, param_cnt) = le_u32(i)?;
    let (i, param_off) = le_u32(i)?;
    let (i, param_disp) = le_u32(i)?;
    let (i, data_cnt) = le_u32(i)?;
    let (i, data_off) = le_u32(i)?;
    let (i, data_disp) = le_u32(i)?;
    Ok((
        i,
        SmbNtTransactSecondaryReqRecord {
            total_param_cnt,
            total_data_cnt,
            param_cnt,
            param_off,
            param_disp,
            data_cnt,
            data_off,
            data_disp,
        },
    ))
}

/// SMB_COM_TRANSACTION / SMB_COM_TRANSACTION2 response, word count 10.
#[derive(Debug, PartialEq, Eq)]
pub struct SmbTransactionRespRecord {
    pub total_param_cnt: u16,
    pub total_data_cnt: u16,
    pub param_cnt: u16,
    pub param_off: u16,
    pub param_disp: u16,
    pub data_cnt: u16,
    pub data_off: u16,
    pub data_disp: u16,
    pub setup_cnt: u8,
}

impl SmbTransactionRespRecord {
    pub fn frag_fields(&self) -> TransFragFields {
        TransFragFields {
            tdcnt: self.total_data_cnt as u32,
            tpcnt: self.total_param_cnt as u32,
            dcnt: self.data_cnt as u32,
            doff: self.data_off as u32,
            ddisp: self.data_disp as u32,
            pcnt: self.param_cnt as u32,
            poff: self.param_off as u32,
            pdisp: self.param_disp as u32,
        }
    }
}

pub fn parse_smb_trans_response_record(i: &[u8]) -> IResult<&[u8], SmbTransactionRespRecord> {
    let (i, _wct) = le_u8(i)?;
    let (i, total_param_cnt) = le_u16(i)?;
    let (i, total_data_cnt) = le_u16(i)?;
    let (i, _res) = le_u16(i)?;
    let (i, param_cnt) = le_u16(i)?;
    let (i, param_off) = le_u16(i)?;
    let (i, param_disp) = le_u16(i)?;
    let (i, data_cnt) = le_u16(i)?;
    let (i, data_off) = le_u16(i)?;
    let (i, data_disp) = le_u16(i)?;
    let (i, setup_cnt) = le_u8(i)?;
    let (i, _res2) = le_u8(i)?;
    Ok((
        i,
        SmbTransactionRespRecord {
            total_param_cnt,
            total_data_cnt,
            param_cnt,
            param_off,
            param_disp,
            data_cnt,
            data_off,
            data_disp,
            setup_cnt,
        },
    ))
}

/// SMB_COM_NT_TRANSACT response, word count 18.
#[derive(Debug, PartialEq, Eq)]
pub struct SmbNtTransactRespRecord {
    pub total_param_cnt: u32,
    pub total_data_cnt: u32,
    pub param_cnt: u32,
    pub param_off: u32,
    pub param_disp: u32,
    pub data_cnt: u32,
    pub data_off: u32,
    pub data_disp: u32,
    pub setup_cnt: u8,
}

impl SmbNtTransactRespRecord {
    pub fn frag_fields(&self) -> TransFragFields {
        TransFragFields {
            tdcnt: self.total_data_cnt,
            tpcnt: self.total_param_cnt,
            dcnt: self.data_cnt,
            doff: self.data_off,
            ddisp: self.data_disp,
            pcnt: self.param_cnt,
            poff: self.param_off,
            pdisp: self.param_disp,
        }
    }
}

pub fn parse_smb_nt_transact_response_record(i: &[u8]) -> IResult<&[u8], SmbNtTransactRespRecord> {
    let (i, _wct) = le_u8(i)?;
    let (i, _res) = take(3_usize)(i)?;
    let (i, total_param_cnt) = le_u32(i)?;
    let (i, total_data_cnt) = le_u32(i)?;
    let (i, param_cnt) = le_u32(i)?;
    let (i, param_off) = le_u32(i)?;
    let (i, param_disp) = le_u32(i)?;
    let (i, data_cnt) = le_u32(i)?;
    let (i, data_off) = le_u32(i)?;
    let (i, data_disp) = le_u32(i)?;
    let (i, setup_cnt) = le_u8(i)?;
    Ok((
        i,
        SmbNtTransactRespRecord {
            total_param_cnt,
            total_data_cnt,
            param_cnt,
            param_off,
            param_disp,
            data_cnt,
            data_off,
            data_disp,
            setup_cnt,
        },
    ))
}

/// TRANS2_OPEN2 request parameters.
pub const SMB_TRANS2_OPEN2_REQ_PARAMS_LEN: usize = 28;

#[derive(Debug, PartialEq, Eq)]
pub struct SmbTrans2Open2ReqParams {
    pub flags: u16,
    pub access_mode: u16,
    pub file_attrs: u16,
    pub creation_time: u32,
    pub open_mode: u16,
    pub alloc_size: u32,
}

pub fn parse_smb_trans2_open2_req_params(i: &[u8]) -> IResult<&[u8], SmbTrans2Open2ReqParams> {
    let (i, flags) = le_u16(i)?;
    let (i, access_mode) = le_u16(i)?;
    let (i, _res) = le_u16(i)?;
    let (i, file_attrs) = le_u16(i)?;
    let (i, creation_time) = le_u32(i)?;
    let (i, open_mode) = le_u16(i)?;
    let (i, alloc_size) = le_u32(i)?;
    let (i, _res2) = take(10_usize)(i)?;
    Ok((
        i,
        SmbTrans2Open2ReqParams {
            flags,
            access_mode,
            file_attrs,
            creation_time,
            open_mode,
            alloc_size,
        },
    ))
}

/// TRANS2_OPEN2 response parameters.
pub const SMB_TRANS2_OPEN2_RESP_PARAMS_LEN: usize = 30;

#[derive(Debug, PartialEq, Eq)]
pub struct SmbTrans2Open2RespParams {
    pub fid: u16,
    pub file_attrs: u16,
    pub creation_time: u32,
    pub file_data_size: u32,
    pub access_mode: u16,
    pub resource_type: u16,
    pub nm_pipe_status: u16,
    pub action_taken: u16,
}

pub fn parse_smb_trans2_open2_resp_params(i: &[u8]) -> IResult<&[u8], SmbTrans2Open2RespParams> {
    let (i, fid) = le_u16(i)?;
    let (i, file_attrs) = le_u16(i)?;
    let (i, creation_time) = le_u32(i)?;
    let (i, file_data_size) = le_u32(i)?;
    let (i, access_mode) = le_u16(i)?;
    let (i, resource_type) = le_u16(i)?;
    let (i, nm_pipe_status) = le_u16(i)?;
    let (i, action_taken) = le_u16(i)?;
    let (i, _res) = le_u32(i)?;
    let (i, _ea_error_off) = le_u16(i)?;
    let (i, _ea_len) = le_u32(i)?;
    Ok((
        i,
        SmbTrans2Open2RespParams {
            fid,
            file_attrs,
            creation_time,
            file_data_size,
            access_mode,
            resource_type,
            nm_pipe_status,
            action_taken,
        },
    ))
}

/// TRANS2_QUERY_FILE_INFORMATION request parameters.
pub const SMB_TRANS2_QUERY_FILE_INFO_REQ_PARAMS_LEN: usize = 4;

#[derive(Debug, PartialEq, Eq)]
pub struct SmbTrans2QueryFileInfoReqParams {
    pub fid: u16,
    pub info_level: u16,
}

pub fn parse_smb_trans2_query_file_info_req_params(
    i: &[u8],
) -> IResult<&[u8], SmbTrans2QueryFileInfoReqParams> {
    let (i, fid) = le_u16(i)?;
    let (i, info_level) = le_u16(i)?;
    Ok((i, SmbTrans2QueryFileInfoReqParams { fid, info_level }))
}

/// TRANS2_SET_FILE_INFORMATION request parameters.
pub const SMB_TRANS2_SET_FILE_INFO_REQ_PARAMS_LEN: usize = 6;

#[derive(Debug, PartialEq, Eq)]
pub struct SmbTrans2SetFileInfoReqParams {
    pub fid: u16,
    pub info_level: u16,
}

pub fn parse_smb_trans2_set_file_info_req_params(
    i: &[u8],
) -> IResult<&[u8], SmbTrans2SetFileInfoReqParams> {
    let (i, fid) = le_u16(i)?;
    let (i, info_level) = le_u16(i)?;
    let (i, _res) = le_u16(i)?;
    Ok((i, SmbTrans2SetFileInfoReqParams { fid, info_level }))
}

// SET_FILE_INFORMATION info levels carrying basic info (attributes) and
// end of file info, in both the legacy and the NT pass-through encodings.
pub const SMB_INFO_SET_FILE_BASIC_INFO: u16 = 0x0101;
pub const SMB_INFO_SET_FILE_END_OF_FILE_INFO: u16 = 0x0104;
pub const SMB_INFO_PT_SET_FILE_BASIC_INFO: u16 = 0x03ec;
pub const SMB_INFO_PT_SET_FILE_END_OF_FILE_INFO: u16 = 0x03fc;

pub fn smb_set_file_info_basic(info_level: u16) -> bool {
    info_level == SMB_INFO_SET_FILE_BASIC_INFO || info_level == SMB_INFO_PT_SET_FILE_BASIC_INFO
}

pub fn smb_set_file_info_end_of_file(info_level: u16) -> bool {
    info_level == SMB_INFO_SET_FILE_END_OF_FILE_INFO
        || info_level == SMB_INFO_PT_SET_FILE_END_OF_FILE_INFO
}

/// SET_FILE_BASIC_INFO data payload.
pub const SMB_SET_FILE_BASIC_INFO_LEN: usize = 40;

#[derive(Debug, PartialEq, Eq)]
pub struct SmbSetFileBasicInfo {
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub ext_file_attrs: u32,
}

pub fn parse_smb_set_file_basic_info(i: &[u8]) -> IResult<&[u8], SmbSetFileBasicInfo> {
    let (i, creation_time) = le_u64(i)?;
    let (i, last_access_time) = le_u64(i)?;
    let (i, last_write_time) = le_u64(i)?;
    let (i, change_time) = le_u64(i)?;
    let (i, ext_file_attrs) = le_u32(i)?;
    let (i, _res) = le_u32(i)?;
    Ok((
        i,
        SmbSetFileBasicInfo {
            creation_time,
            last_access_time,
            last_write_time,
            change_time,
            ext_file_attrs,
        },
    ))
}

/// QUERY_FILE_INFORMATION info levels whose response carries a usable
/// file size.
#[derive(Clone, Copy, Debug, FromPrimitive, PartialEq, Eq)]
pub enum QueryInfoLevel {
    InfoStandard = 0x0001,
    InfoQueryEaSize = 0x0002,
    FileStandardInfo = 0x0102,
    FileAllInfo = 0x0107,
    PtFileStandardInfo = 0x03ed,
    PtFileAllInfo = 0x03fa,
    PtFileStreamInfo = 0x03fe,
    PtNetworkOpenInfo = 0x040a,
}

/// Extract the file size from a QUERY_FILE_INFORMATION response data
/// payload. Returns None when the payload is shorter than the layout the
/// info level mandates.
pub fn smb_query_info_file_size(level: QueryInfoLevel, data: &[u8]) -> Option<u64> {
    let (min_len, off, wide) = match level {
        // 6 date/time words, then FileDataSize and AllocationSize
        QueryInfoLevel::InfoStandard => (22, 12, false),
        QueryInfoLevel::InfoQueryEaSize => (26, 12, false),
        // AllocationSize then EndOfFile; the pass-through stream level
        // answers with the same layout
        QueryInfoLevel::FileStandardInfo => (22, 8, true),
        QueryInfoLevel::PtFileStreamInfo => (22, 8, true),
        // stream info layout: NextEntryOffset(4) and StreamNameLength(4),
        // then StreamSize(8)
        QueryInfoLevel::PtFileStandardInfo => (16, 8, true),
        // basic info block then AllocationSize and EndOfFile
        QueryInfoLevel::FileAllInfo => (100, 48, true),
        QueryInfoLevel::PtFileAllInfo => (100, 48, true),
        // four timestamps, AllocationSize, then EndOfFile
        QueryInfoLevel::PtNetworkOpenInfo => (56, 40, true),
    };
    if data.len() < min_len {
        return None;
    }
    if wide {
        let mut b = [0u8; 8];
        b.copy_from_slice(&data[off..off + 8]);
        Some(u64::from_le_bytes(b))
    } else {
        let mut b = [0u8; 4];
        b.copy_from_slice(&data[off..off + 4]);
        Some(u32::from_le_bytes(b) as u64)
    }
}

/// NT_TRANSACT_CREATE request parameters.
pub const SMB_NT_TRANSACT_CREATE_REQ_PARAMS_LEN: usize = 53;

#[derive(Debug, PartialEq, Eq)]
pub struct SmbNtTransactCreateReqParams {
    pub flags: u32,
    pub root_dir_fid: u32,
    pub desired_access: u32,
    pub alloc_size: u64,
    pub ext_file_attrs: u32,
    pub share_access: u32,
    pub create_disposition: u32,
    pub create_options: u32,
    pub sd_length: u32,
    pub ea_length: u32,
    pub file_name_length: u32,
    pub impersonation_level: u32,
    pub security_flags: u8,
}

impl SmbNtTransactCreateReqParams {
    pub fn sequential_only(&self) -> bool {
        self.create_options & SMB_CREATE_OPTIONS_SEQUENTIAL_ONLY != 0
    }
}

pub fn parse_smb_nt_transact_create_req_params(
    i: &[u8],
) -> IResult<&[u8], SmbNtTransactCreateReqParams> {
    let (i, flags) = le_u32(i)?;
    let (i, root_dir_fid) = le_u32(i)?;
    let (i, desired_access) = le_u32(i)?;
    let (i, alloc_size) = le_u64(i)?;
    let (i, ext_file_attrs) = le_u32(i)?;
    let (i, share_access) = le_u32(i)?;
    let (i, create_disposition) = le_u32(i)?;
    let (i, create_options) = le_u32(i)?;
    let (i, sd_length) = le_u32(i)?;
    let (i, ea_length) = le_u32(i)?;
    let (i, file_name_length) = le_u32(i)?;
    let (i, impersonation_level) = le_u32(i)?;
    let (i, security_flags) = le_u8(i)?;
    Ok((
        i,
        SmbNtTransactCreateReqParams {
            flags,
            root_dir_fid,
            desired_access,
            alloc_size,
            ext_file_attrs,
            share_access,
            create_disposition,
            create_options,
            sd_length,
            ea_length,
            file_name_length,
            impersonation_level,
            security_flags,
        },
    ))
}

/// NT_TRANSACT_CREATE response parameters.
pub const SMB_NT_TRANSACT_CREATE_RESP_PARAMS_LEN: usize = 69;

#[derive(Debug, PartialEq, Eq)]
pub struct SmbNtTransactCreateRespParams {
    pub oplock_level: u8,
    pub fid: u16,
    pub create_action: u32,
    pub ext_file_attrs: u32,
    pub alloc_size: u64,
    pub end_of_file: u64,
    pub resource_type: u16,
    pub nm_pipe_status: u16,
    pub directory: bool,
}

pub fn parse_smb_nt_transact_create_resp_params(
    i: &[u8],
) -> IResult<&[u8], SmbNtTransactCreateRespParams> {
    let (i, oplock_level) = le_u8(i)?;
    let (i, _res) = le_u8(i)?;
    let (i, fid) = le_u16(i)?;
    let (i, create_action) = le_u32(i)?;
    let (i, _ea_error_off) = le_u32(i)?;
    let (i, _creation_time) = le_u64(i)?;
    let (i, _last_access_time) = le_u64(i)?;
    let (i, _last_write_time) = le_u64(i)?;
    let (i, _change_time) = le_u64(i)?;
    let (i, ext_file_attrs) = le_u32(i)?;
    let (i, alloc_size) = le_u64(i)?;
    let (i, end_of_file) = le_u64(i)?;
    let (i, resource_type) = le_u16(i)?;
    let (i, nm_pipe_status) = le_u16(i)?;
    let (i, directory) = le_u8(i)?;
    Ok((
        i,
        SmbNtTransactCreateRespParams {
            oplock_level,
            fid,
            create_action,
            ext_file_attrs,
            alloc_size,
            end_of_file,
            resource_type,
            nm_pipe_status,
            directory: directory != 0,
        },
    ))
}
