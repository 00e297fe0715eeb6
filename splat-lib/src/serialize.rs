use crate::common::{dim_for_degree, MAX_POINTS, MAX_SH_DEGREE};
use crate::error::{Result, SplatError};
use crate::structures::{
    PackedGaussians, PackedGaussiansHeader, HEADER_SIZE, LEGACY_VERSION, MAGIC, VERSION,
};
use zerocopy::{FromBytes, IntoBytes};

pub fn serialize_packed_gaussians(pg: &PackedGaussians) -> Result<Vec<u8>> {
    pg.check_sizes()
        .map_err(|e| SplatError::SerializePackedGaussians(e.to_string()))?;

    let data_size = pg.positions.len()
        + pg.alphas.len()
        + pg.colors.len()
        + pg.scales.len()
        + pg.rotations.len()
        + pg.sh.len();

    let mut out = Vec::with_capacity(HEADER_SIZE + data_size);
    let hdr = PackedGaussiansHeader::for_packed(pg);
    out.extend_from_slice(hdr.as_bytes());

    out.extend_from_slice(&pg.positions);
    out.extend_from_slice(&pg.alphas);
    out.extend_from_slice(&pg.colors);
    out.extend_from_slice(&pg.scales);
    out.extend_from_slice(&pg.rotations);
    out.extend_from_slice(&pg.sh);
    Ok(out)
}

/// Largest serialized payload `max_points` points can produce: fixed point
/// positions, every section, and a full degree 3 SH block.
pub(crate) fn max_payload_len(max_points: usize) -> usize {
    let per_point = 9 + 1 + 3 + 3 + 3 + dim_for_degree(MAX_SH_DEGREE) * 3;
    HEADER_SIZE.saturating_add(max_points.saturating_mul(per_point))
}

fn reject(msg: String) -> SplatError {
    tracing::warn!("deserialize_packed_gaussians: {}", msg);
    SplatError::DeserializePackedGaussians(msg)
}

/// Parses and validates the 16 byte header at the start of `data`.
pub fn read_header(data: &[u8]) -> Result<PackedGaussiansHeader> {
    read_header_with_limit(data, MAX_POINTS)
}

pub(crate) fn read_header_with_limit(
    data: &[u8],
    max_points: usize,
) -> Result<PackedGaussiansHeader> {
    let (hdr, _) = PackedGaussiansHeader::read_from_prefix(data)
        .map_err(|_| reject(format!("Corrupt header ({} bytes)", data.len())))?;

    if hdr.magic.get() != MAGIC {
        return Err(reject(format!(
            "Invalid magic number {:#010x}",
            hdr.magic.get()
        )));
    }
    let version = hdr.version.get();
    if !(LEGACY_VERSION..=VERSION).contains(&version) {
        return Err(reject(format!("Unsupported version: {}", version)));
    }
    if hdr.num_points.get() as usize > max_points {
        return Err(reject(format!("Too many points: {}", hdr.num_points.get())));
    }
    if hdr.sh_degree > MAX_SH_DEGREE {
        return Err(reject(format!("Unsupported SH degree: {}", hdr.sh_degree)));
    }
    Ok(hdr)
}

pub fn deserialize_packed_gaussians(data: &[u8]) -> Result<PackedGaussians> {
    deserialize_packed_gaussians_with_limit(data, MAX_POINTS)
}

pub(crate) fn deserialize_packed_gaussians_with_limit(
    data: &[u8],
    max_points: usize,
) -> Result<PackedGaussians> {
    let hdr = read_header_with_limit(data, max_points)?;

    let np = hdr.num_points.get() as usize;
    let uses_f16 = hdr.version.get() == LEGACY_VERSION;

    let pos_bytes = if uses_f16 { 6 } else { 9 };
    let positions_len = np * pos_bytes;
    let alphas_len = np;
    let colors_len = np * 3;
    let scales_len = np * 3;
    let rotations_len = np * 3;
    let sh_len = np * dim_for_degree(hdr.sh_degree) * 3;

    let needed = HEADER_SIZE + positions_len + alphas_len + colors_len + scales_len + rotations_len;
    if data.len() < needed {
        return Err(reject(format!(
            "Binary data is too short, need {} bytes, have {}",
            needed,
            data.len()
        )));
    }

    let mut offset = HEADER_SIZE;
    let mut section = |len: usize| {
        let bytes = data[offset..offset + len].to_vec();
        offset += len;
        bytes
    };
    let positions = section(positions_len);
    let alphas = section(alphas_len);
    let colors = section(colors_len);
    let scales = section(scales_len);
    let rotations = section(rotations_len);
    // SH coefficients follow only when the writer emitted them.
    let sh = if sh_len > 0 && data.len() >= needed + sh_len {
        section(sh_len)
    } else {
        Vec::new()
    };

    tracing::debug!(
        "Deserialized {} packed gaussians (version {}, sh degree {})",
        np,
        hdr.version.get(),
        hdr.sh_degree
    );

    Ok(PackedGaussians {
        num_points: np as u32,
        sh_degree: hdr.sh_degree,
        fractional_bits: hdr.fractional_bits,
        antialiased: hdr.antialiased(),
        positions,
        scales,
        rotations,
        alphas,
        colors,
        sh,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::pack_gaussians;
    use crate::structures::Point;
    use glam::Vec3;

    fn packed_sample(n: usize) -> PackedGaussians {
        let points: Vec<Point> = (0..n)
            .map(|i| Point {
                position: Vec3::new(i as f32, 2.0 * i as f32, -(i as f32)),
                ..Default::default()
            })
            .collect();
        pack_gaussians(&points)
    }

    fn with_header_field(bytes: &[u8], offset: usize, value: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        out[offset..offset + value.len()].copy_from_slice(value);
        out
    }

    #[test]
    fn test_section_order_and_round_trip() {
        let pg = packed_sample(3);
        let bytes = serialize_packed_gaussians(&pg).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 3 * (9 + 1 + 3 + 3 + 3));
        assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 27], pg.positions.as_slice());
        assert_eq!(&bytes[HEADER_SIZE + 27..HEADER_SIZE + 30], pg.alphas.as_slice());
        assert_eq!(deserialize_packed_gaussians(&bytes).unwrap(), pg);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let bytes = serialize_packed_gaussians(&packed_sample(1)).unwrap();
        let bad = with_header_field(&bytes, 0, &0xDEADBEEFu32.to_le_bytes());
        assert!(matches!(
            deserialize_packed_gaussians(&bad),
            Err(SplatError::DeserializePackedGaussians(_))
        ));
    }

    #[test]
    fn test_rejects_unsupported_versions() {
        let bytes = serialize_packed_gaussians(&packed_sample(1)).unwrap();
        for version in [0u32, 3, u32::MAX] {
            let bad = with_header_field(&bytes, 4, &version.to_le_bytes());
            assert!(deserialize_packed_gaussians(&bad).is_err(), "version {}", version);
        }
    }

    #[test]
    fn test_rejects_too_many_points() {
        let bytes = serialize_packed_gaussians(&packed_sample(1)).unwrap();
        let bad = with_header_field(&bytes, 8, &((MAX_POINTS as u32) + 1).to_le_bytes());
        let err = deserialize_packed_gaussians(&bad).unwrap_err();
        assert!(err.to_string().contains("Too many points"));
    }

    #[test]
    fn test_rejects_sh_degree_above_three() {
        let bytes = serialize_packed_gaussians(&packed_sample(1)).unwrap();
        let bad = with_header_field(&bytes, 12, &[4]);
        assert!(deserialize_packed_gaussians(&bad).is_err());
    }

    #[test]
    fn test_rejects_short_sections() {
        let bytes = serialize_packed_gaussians(&packed_sample(4)).unwrap();
        for cut in [0, 5, HEADER_SIZE, HEADER_SIZE + 10, bytes.len() - 1] {
            assert!(deserialize_packed_gaussians(&bytes[..cut]).is_err(), "cut {}", cut);
        }
    }

    #[test]
    fn test_sh_degree_is_metadata_without_section() {
        let bytes = serialize_packed_gaussians(&packed_sample(2)).unwrap();
        let five_sections = with_header_field(&bytes, 12, &[2]);
        let pg = deserialize_packed_gaussians(&five_sections).unwrap();
        assert_eq!(pg.sh_degree, 2);
        assert!(pg.sh.is_empty());
        assert_eq!(serialize_packed_gaussians(&pg).unwrap(), five_sections);
    }

    #[test]
    fn test_sh_section_is_kept_when_present() {
        // Degree 1 carries 9 bytes per point after the rotations.
        let bytes = serialize_packed_gaussians(&packed_sample(2)).unwrap();
        let mut with_sh = with_header_field(&bytes, 12, &[1]);
        with_sh.extend(std::iter::repeat(128u8).take(2 * 9));
        let pg = deserialize_packed_gaussians(&with_sh).unwrap();
        assert_eq!(pg.sh_degree, 1);
        assert_eq!(pg.sh.len(), 18);
        assert_eq!(serialize_packed_gaussians(&pg).unwrap(), with_sh);
    }

    #[test]
    fn test_serialize_refuses_partial_sh_section() {
        let mut pg = packed_sample(2);
        pg.sh_degree = 1;
        pg.sh = vec![0; 5];
        assert!(serialize_packed_gaussians(&pg).is_err());
    }

    #[test]
    fn test_max_payload_len_covers_full_sh() {
        assert_eq!(max_payload_len(0), HEADER_SIZE);
        assert_eq!(max_payload_len(2), HEADER_SIZE + 2 * 64);
        let mut pg = packed_sample(2);
        pg.sh_degree = MAX_SH_DEGREE;
        pg.sh = vec![0; 2 * 45];
        assert_eq!(serialize_packed_gaussians(&pg).unwrap().len(), max_payload_len(2));
    }

    #[test]
    fn test_legacy_version_uses_six_byte_positions() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&LEGACY_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&[0; 6 + 1 + 3 + 3 + 3]);
        let pg = deserialize_packed_gaussians(&bytes).unwrap();
        assert!(pg.uses_float16());
        assert_eq!(serialize_packed_gaussians(&pg).unwrap(), bytes);
    }

    #[test]
    fn test_serialize_refuses_inconsistent_buffers() {
        let mut pg = packed_sample(2);
        pg.scales.truncate(5);
        assert!(matches!(
            serialize_packed_gaussians(&pg),
            Err(SplatError::SerializePackedGaussians(_))
        ));
    }

    #[test]
    fn test_antialiased_flag_round_trips() {
        let mut pg = packed_sample(1);
        pg.antialiased = true;
        let bytes = serialize_packed_gaussians(&pg).unwrap();
        assert_eq!(bytes[14], 1);
        assert!(deserialize_packed_gaussians(&bytes).unwrap().antialiased);
    }
}
