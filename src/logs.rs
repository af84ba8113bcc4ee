//! Per-service log files.
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Creates (or truncates) the log file a service writes its combined output to.
pub fn prepare_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }

    File::create(path)
}

/// Reads the last `lines` lines of a log file. Missing files read as empty.
pub fn tail_lines(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    if lines == 0 {
        return Ok(Vec::new());
    }

    let mut buffer: VecDeque<String> = VecDeque::with_capacity(lines);

    for line in BufReader::new(file).lines().map_while(Result::ok) {
        if buffer.len() == lines {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    Ok(buffer.into_iter().collect())
}
