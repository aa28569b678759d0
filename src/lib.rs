// meld: evaluation core for a lattice-based configuration language.
//
// This library is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library.  If not, see
// <https://www.gnu.org/licenses/>.

extern crate bigdecimal;
extern crate enumflags2;
extern crate num_bigint;
extern crate num_traits;
extern crate regex;
extern crate serde_json;
#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod util;
pub mod ast;
pub mod binop;
pub mod builtin;
pub mod errors;
pub mod eval;
pub mod export;
pub mod instance;
pub mod kind;
pub mod label;
pub mod lower;
pub mod number;
pub mod resolve;
pub mod subsume;
pub mod value;
