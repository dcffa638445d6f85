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

//! Reassembly buffer for one transaction stream (parameters or data).

use log::debug;

/// How `append_at` treats a displacement that does not sit exactly at the
/// current fill point. Windows clients write strictly in order; Samba is
/// known to accept rewrites of bytes it already has.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendMode {
    Strict,
    Lenient,
}

/// Growable byte buffer bounded by the total count declared on the wire.
///
/// The total is a bound, not a preallocation: counts are attacker
/// controlled, so memory is only committed as fragment bytes arrive.
#[derive(Debug, Default)]
pub struct FragBuf {
    total: usize,
    bytes: Vec<u8>,
}

impl FragBuf {
    pub fn new(total: usize) -> FragBuf {
        FragBuf {
            total,
            bytes: Vec::new(),
        }
    }

    pub fn filled(&self) -> usize {
        self.bytes.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Lower the declared total. Totals never grow once set; bytes beyond
    /// a lowered total are dropped.
    pub fn lower_total(&mut self, total: usize) {
        if total < self.total {
            self.total = total;
            if self.bytes.len() > total {
                self.bytes.truncate(total);
            }
        }
    }

    /// Place `data` at stream displacement `disp`.
    ///
    /// Every mode rejects writes that would end past the declared total.
    /// `Strict` additionally requires `disp` to equal the fill point.
    /// `Lenient` accepts `disp` at or before the fill point, but a
    /// rewrite may not extend the buffer: growth only ever happens by
    /// appending exactly at the fill point.
    pub fn append_at(&mut self, disp: usize, data: &[u8], mode: AppendMode) -> Result<(), ()> {
        let end = disp.checked_add(data.len()).ok_or(())?;
        if end > self.total {
            debug!(
                "fragment [{}, {}) exceeds declared total {}",
                disp, end, self.total
            );
            return Err(());
        }

        let filled = self.bytes.len();
        if disp == filled {
            self.bytes.extend_from_slice(data);
            return Ok(());
        }

        match mode {
            AppendMode::Strict => {
                debug!("displacement {} does not match progress {}", disp, filled);
                Err(())
            }
            AppendMode::Lenient => {
                if disp > filled || end > filled {
                    debug!(
                        "lenient rewrite [{}, {}) outside filled {} bytes",
                        disp, end, filled
                    );
                    return Err(());
                }
                self.bytes[disp..end].copy_from_slice(data);
                Ok(())
            }
        }
    }
}
