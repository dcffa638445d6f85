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

/// Alertable anomalies observed while inspecting transaction commands.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmbEvent {
    /// File created or modified with attribute bits commonly used to
    /// hide files from enumeration (readonly/hidden/system).
    EvasiveFileAttrs = 0,
    /// A legal but rarely seen subcommand was used.
    UnusualCommandUsed = 1,
    /// A deprecated/unimplemented subcommand was used.
    DeprecatedCommandUsed = 2,
    /// Setup count does not match what servers accept for the command.
    InvalidSetupCount = 3,
    /// A carried stream declares a total count of zero.
    DcntZero = 4,
}

impl SmbEvent {
    pub fn from_id(id: u32) -> Option<SmbEvent> {
        match id {
            0 => Some(SmbEvent::EvasiveFileAttrs),
            1 => Some(SmbEvent::UnusualCommandUsed),
            2 => Some(SmbEvent::DeprecatedCommandUsed),
            3 => Some(SmbEvent::InvalidSetupCount),
            4 => Some(SmbEvent::DcntZero),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            SmbEvent::EvasiveFileAttrs => "EVASIVE_FILE_ATTRS",
            SmbEvent::UnusualCommandUsed => "UNUSUAL_COMMAND_USED",
            SmbEvent::DeprecatedCommandUsed => "DEPR_COMMAND_USED",
            SmbEvent::InvalidSetupCount => "INVALID_SETUP_COUNT",
            SmbEvent::DcntZero => "DCNT_ZERO",
        }
    }
}
