//! Byte-level helpers for locating JPEG streams and their Exif payloads inside arbitrary
//! containers (camera files, sidecars, images with unusual wrappers).

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const APP1: u8 = 0xE1;
const SOS: u8 = 0xDA;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Returns the largest complete JPEG stream (SOI..EOI) found in `data`.
pub fn find_embedded_jpeg(data: &[u8]) -> Option<&[u8]> {
    let mut best: Option<&[u8]> = None;
    let mut idx = 0;
    while idx + 1 < data.len() {
        if data[idx..idx + 2] == SOI {
            let Some(end) = find_jpeg_end(data, idx + 2) else {
                break;
            };
            let candidate = &data[idx..end];
            if best.map_or(true, |b| candidate.len() > b.len()) {
                best = Some(candidate);
            }
            idx = end;
            continue;
        }
        idx += 1;
    }
    best
}

fn find_jpeg_end(data: &[u8], mut idx: usize) -> Option<usize> {
    while idx + 1 < data.len() {
        if data[idx..idx + 2] == EOI {
            return Some(idx + 2);
        }
        idx += 1;
    }
    None
}

/// Returns the TIFF-structured Exif payload of a JPEG stream, without the `Exif\0\0` header.
pub fn exif_payload(jpeg: &[u8]) -> Option<&[u8]> {
    if jpeg.len() < 4 || jpeg[..2] != SOI {
        return None;
    }
    let mut idx = 2;
    while idx + 3 < jpeg.len() {
        if jpeg[idx] != 0xFF {
            idx += 1;
            continue;
        }
        let marker = jpeg[idx + 1];
        idx += 2;
        if marker == EOI[1] || marker == SOS {
            break;
        }
        let len = u16::from_be_bytes([jpeg[idx], jpeg[idx + 1]]) as usize;
        if len < 2 || idx + len > jpeg.len() {
            break;
        }
        let payload = &jpeg[idx + 2..idx + len];
        if marker == APP1 && payload.starts_with(EXIF_HEADER) {
            return Some(&payload[EXIF_HEADER.len()..]);
        }
        idx += len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_with_app1(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8, 0xFF, APP1];
        let len = (payload.len() + EXIF_HEADER.len() + 2) as u16;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(EXIF_HEADER);
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, SOS, 0x00, 0x02, 0xFF, 0xD9]);
        out
    }

    #[test]
    fn picks_largest_embedded_stream() {
        let small = jpeg_with_app1(b"MM");
        let large = jpeg_with_app1(b"MM\0*\0\0\0\x08");
        let mut container = b"junk".to_vec();
        container.extend_from_slice(&small);
        container.extend_from_slice(b"more junk");
        container.extend_from_slice(&large);

        let found = find_embedded_jpeg(&container).unwrap();
        assert_eq!(found, large.as_slice());
    }

    #[test]
    fn extracts_exif_payload() {
        let jpeg = jpeg_with_app1(b"II*\0");
        assert_eq!(exif_payload(&jpeg), Some(&b"II*\0"[..]));
        assert_eq!(exif_payload(b"not a jpeg"), None);
    }
}
