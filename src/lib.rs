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

//! Passive inspection of SMB1 transaction commands.
//!
//! This library reassembles the parameter and data streams of the three
//! SMB1 transaction command families (TRANSACTION, TRANSACTION2 and
//! NT_TRANSACT) from observed PDUs, tracks the files and named pipes they
//! touch, and hands reassembled named pipe payloads to a DCE/RPC analyzer.
//! It never emits bytes onto the wire.

pub mod smb;
