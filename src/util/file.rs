/* This file is part of agora
 *
 * Copyright (C) 2023-2026 agora developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    fs::File,
    io::{BufReader, Read, Write},
    path::Path,
};

use crate::Result;

pub fn load_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut st = String::new();
    reader.read_to_string(&mut st)?;
    Ok(st)
}

pub fn save_file(path: &Path, st: &str) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(st.as_bytes())?;
    Ok(())
}

/// Load a line-oriented file, skipping empty lines. A missing file
/// is treated as an empty one.
pub fn load_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(vec![])
    }

    let st = load_file(path)?;
    Ok(st.lines().filter(|l| !l.is_empty()).map(|l| l.to_string()).collect())
}

/// Persist lines to a file, one per line, LF-terminated.
pub fn save_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut st = lines.join("\n");
    if !st.is_empty() {
        st.push('\n');
    }
    save_file(path, &st)
}
