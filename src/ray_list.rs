//! Text format for batches of rays.
//!
//! One ray per line: `origin_x origin_y origin_z dir_x dir_y dir_z t_min t_max`, separated
//! by whitespace. Blank lines and lines starting with `#` are comments. Lines that don't
//! hold exactly eight numbers are skipped.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use crate::geometry::{FloatType, Ray, WorldPoint, WorldVector};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RayList {
    pub rays: Vec<Ray>,
    /// Number of non-comment lines that could not be parsed
    pub skipped_lines: usize,
}

/// Parses a single ray line. Returns None for malformed lines; comments are not
/// recognized here.
pub fn parse_ray(line: &str) -> Option<Ray> {
    let mut values = [0.0 as FloatType; 8];
    let mut fields = line.split_whitespace();
    for value in values.iter_mut() {
        *value = fields.next()?.parse().ok()?;
    }
    if fields.next().is_some() {
        return None;
    }

    let [ox, oy, oz, dx, dy, dz, t_min, t_max] = values;
    Some(Ray::new(
        WorldPoint::new(ox, oy, oz),
        WorldVector::new(dx, dy, dz),
        t_min,
        t_max,
    ))
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Reads rays until the end of input. Only I/O errors abort the reading.
pub fn read_ray_list(reader: impl BufRead) -> io::Result<RayList> {
    let mut list = RayList::default();
    for line in reader.lines() {
        let line = line?;
        if is_comment(&line) {
            continue;
        }
        match parse_ray(&line) {
            Some(ray) => list.rays.push(ray),
            None => list.skipped_lines += 1,
        }
    }
    Ok(list)
}

pub fn load_ray_list(p: impl AsRef<Path>) -> io::Result<RayList> {
    read_ray_list(BufReader::new(File::open(p)?))
}
