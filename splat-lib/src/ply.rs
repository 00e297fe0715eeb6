use crate::common::{degree_for_dim, MAX_POINTS};
use crate::coords::{
    color_from_ply, color_to_ply, position_from_ply, position_to_ply, rotation_from_ply,
    rotation_to_ply, scale_from_ply, scale_to_ply, temporal_from_ply,
};
use crate::error::{Result, SplatError};
use crate::structures::Point;
use foldhash::HashMap;
use foldhash::HashMapExt;
use glam::{Vec3, Vec4};
use std::io::Write;
use std::path::Path;

const MAX_SH_FIELDS: usize = 45;
const TEMPORAL_FIELDS: [&str; 8] = [
    "trbf_center",
    "trbf_scale",
    "motion_0",
    "motion_1",
    "motion_2",
    "motion_3",
    "motion_4",
    "motion_5",
];

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    let line = match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            &buffer[start..start + pos]
        }
        None => {
            *offset = buffer.len();
            &buffer[start..]
        }
    };
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

fn parse_error(msg: impl Into<String>) -> SplatError {
    let msg = msg.into();
    tracing::warn!("PLY rejected: {}", msg);
    SplatError::ParsePly(msg)
}

#[inline(always)]
fn idx_of(hm: &HashMap<&str, usize>, name: &str) -> Result<usize> {
    hm.get(name).copied().ok_or_else(|| {
        tracing::warn!("PLY rejected: missing required field {}", name);
        SplatError::MissingField(name.to_string())
    })
}

#[inline(always)]
fn read_f32(vertex: &[u8], idx: usize) -> f32 {
    let b = &vertex[idx * 4..idx * 4 + 4];
    f32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Column indices of the fields the importer consumes.
struct Columns {
    position: [usize; 3],
    scale: [usize; 3],
    rotation: [usize; 4],
    opacity: usize,
    color: [usize; 3],
    temporal: Option<[usize; 8]>,
}

impl Columns {
    fn resolve(field_map: &HashMap<&str, usize>) -> Result<Self> {
        let idx = |name: &str| idx_of(field_map, name);
        Ok(Columns {
            position: [idx("x")?, idx("y")?, idx("z")?],
            scale: [idx("scale_0")?, idx("scale_1")?, idx("scale_2")?],
            rotation: [idx("rot_0")?, idx("rot_1")?, idx("rot_2")?, idx("rot_3")?],
            opacity: idx("opacity")?,
            color: [idx("f_dc_0")?, idx("f_dc_1")?, idx("f_dc_2")?],
            temporal: {
                let found: Vec<usize> = TEMPORAL_FIELDS
                    .iter()
                    .filter_map(|name| field_map.get(name).copied())
                    .collect();
                found.try_into().ok()
            },
        })
    }

    fn read_point(&self, vertex: &[u8]) -> Point {
        let f = |i: usize| read_f32(vertex, i);
        let [x, y, z] = self.position.map(f);
        let [s0, s1, s2] = self.scale.map(f);
        let [r0, r1, r2, r3] = self.rotation.map(f);
        let [c0, c1, c2] = self.color.map(f);

        let (time, motion) = match self.temporal {
            Some(cols) => temporal_from_ply(cols.map(f)),
            None => (Vec4::ZERO, Vec4::ZERO),
        };

        Point {
            position: position_from_ply(Vec3::new(x, y, z)),
            rotation: rotation_from_ply(Vec4::new(r0, r1, r2, r3)),
            scale: scale_from_ply(Vec3::new(s0, s1, s2)),
            color: color_from_ply(Vec3::new(c0, c1, c2), f(self.opacity)),
            time,
            motion,
        }
    }
}

/// Parses a binary little endian gaussian splat PLY into storage convention
/// points. All or nothing: any header or body problem yields an error.
#[inline(never)]
pub fn parse_splat(raw_data: &[u8]) -> Result<Vec<Point>> {
    parse_splat_with_limit(raw_data, MAX_POINTS)
}

pub(crate) fn parse_splat_with_limit(raw_data: &[u8], max_points: usize) -> Result<Vec<Point>> {
    let mut offset = 0;

    // Line #1: "ply"
    let line1 = next_line(raw_data, &mut offset).ok_or_else(|| parse_error("No 'ply' line"))?;
    if line1 != b"ply" {
        return Err(parse_error("Not a .ply file (missing 'ply' header)"));
    }

    // Line #2: "format binary_little_endian 1.0"
    let line2 =
        next_line(raw_data, &mut offset).ok_or_else(|| parse_error("Missing format line"))?;
    if line2 != b"format binary_little_endian 1.0" {
        return Err(parse_error(
            "Unsupported .ply format (only binary_little_endian 1.0 is supported)",
        ));
    }

    // Line #3: "element vertex N"
    let line3 = next_line(raw_data, &mut offset)
        .ok_or_else(|| parse_error("Missing 'element vertex' line"))?;
    let num_str = line3
        .strip_prefix(b"element vertex ")
        .ok_or_else(|| parse_error("Missing 'element vertex' definition"))?;
    let num_points: usize = std::str::from_utf8(num_str)
        .map_err(|e| parse_error(format!("UTF-8 error: {}", e)))?
        .trim()
        .parse()
        .map_err(|e| parse_error(format!("Invalid vertex count: {}", e)))?;
    if num_points == 0 || num_points > max_points {
        return Err(parse_error(format!("Invalid vertex count: {}", num_points)));
    }
    tracing::debug!("Loading {} points", num_points);

    let mut field_names: Vec<&str> = Vec::new();
    loop {
        let line = next_line(raw_data, &mut offset)
            .ok_or_else(|| parse_error("No 'end_header' found before EOF"))?;

        if line == b"end_header" {
            break;
        }

        // Only support "property float <name>"
        let raw_name = line.strip_prefix(b"property float ").ok_or_else(|| {
            parse_error(format!(
                "Unsupported property line: {}",
                String::from_utf8_lossy(line)
            ))
        })?;
        let name = std::str::from_utf8(raw_name)
            .map_err(|e| parse_error(format!("UTF-8 error in field name: {}", e)))?
            .trim();
        tracing::trace!("Field {}: {}", field_names.len(), name);
        field_names.push(name);
    }

    let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(field_names.len());
    for (i, &name) in field_names.iter().enumerate() {
        field_map.insert(name, i);
    }

    let columns = Columns::resolve(&field_map)?;

    // Optional spherical harmonics: f_rest_0 to f_rest_44, contiguous from 0
    let sh_count = (0..MAX_SH_FIELDS)
        .take_while(|i| field_map.contains_key(format!("f_rest_{}", i).as_str()))
        .count();
    if sh_count % 3 != 0 {
        return Err(parse_error(format!(
            "Incomplete spherical harmonics fields ({} f_rest values)",
            sh_count
        )));
    }
    if sh_count > 0 {
        tracing::debug!(
            "Source carries SH degree {}, higher bands are dropped",
            degree_for_dim(sh_count / 3)
        );
    }
    if columns.temporal.is_none() && TEMPORAL_FIELDS.iter().any(|n| field_map.contains_key(n)) {
        tracing::debug!("Partial temporal fields present, time and motion left at zero");
    }

    let vertex_size = field_names.len() * 4;
    let expected_bytes = num_points
        .checked_mul(vertex_size)
        .ok_or_else(|| parse_error("Overflow in byte calculation"))?;
    let body = &raw_data[offset..];
    if body.len() < expected_bytes {
        return Err(parse_error(format!(
            "Binary data is too short, need {} bytes, have {}",
            expected_bytes,
            body.len()
        )));
    }

    let points = body[..expected_bytes]
        .chunks_exact(vertex_size)
        .map(|vertex| columns.read_point(vertex))
        .collect();

    Ok(points)
}

pub fn load_points_from_file(path: impl AsRef<Path>) -> Result<Vec<Point>> {
    let path = path.as_ref();
    let raw = std::fs::read(path).map_err(|e| {
        tracing::warn!("Unable to open {}: {}", path.display(), e);
        SplatError::Io(e)
    })?;
    parse_splat(&raw)
}

/// Writes points back out as a binary little endian PLY in the capture
/// convention. Higher order SH is not stored, so no `f_rest_*` is emitted.
pub fn write_ply(output: &mut Vec<u8>, points: &[Point], include_normals: bool) -> Result<()> {
    let has_temporal = points
        .iter()
        .any(|p| p.time != Vec4::ZERO || p.motion != Vec4::ZERO);

    output.clear();
    output.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
    writeln!(output, "element vertex {}", points.len())?;
    output.extend_from_slice(b"property float x\nproperty float y\nproperty float z\n");
    if include_normals {
        output.extend_from_slice(b"property float nx\nproperty float ny\nproperty float nz\n");
    }
    output.extend_from_slice(
        b"property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n\
          property float opacity\n\
          property float scale_0\nproperty float scale_1\nproperty float scale_2\n\
          property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n",
    );
    if has_temporal {
        for name in TEMPORAL_FIELDS {
            writeln!(output, "property float {}", name)?;
        }
    }
    output.extend_from_slice(b"end_header\n");

    let floats_per_point =
        3 + if include_normals { 3 } else { 0 } + 4 + 3 + 4 + if has_temporal { 8 } else { 0 };
    output.reserve(points.len() * floats_per_point * 4);

    let mut push = |values: &[f32]| {
        for v in values {
            output.extend_from_slice(&v.to_le_bytes());
        }
    };
    for p in points {
        push(&position_to_ply(p.position).to_array());
        if include_normals {
            push(&[0.0; 3]);
        }
        // f_dc_0..2 followed by opacity
        push(&color_to_ply(p.color).to_array());
        push(&scale_to_ply(p.scale).to_array());
        push(&rotation_to_ply(p.rotation).to_array());
        if has_temporal {
            let (t, m) = (p.time, p.motion);
            // Inverse of temporal_from_ply
            push(&[t.x, t.y, t.z, -m.x, -t.w, m.y, -m.w, -m.z]);
        }
    }
    Ok(())
}
