//! Whole-sheet payload assembly.
//!
//! A whole-sheet read fetches every chunk's payload area and reassembles
//! the document envelope: the raw bytes written into non-meta cells joined
//! with `,` inside `{"celldata": [` … `]}`, with the meta cell's content
//! injected before the closing brace when present. Cell slots are recovered
//! by splitting each payload into fixed-size slots and trimming the
//! trailing pad bytes; a slot that is pure padding was never written.

use sheetfs_proto::MAX_BYTES_PER_CELL;

const HEADER: &[u8] = b"{\"celldata\": [";

/// Strip trailing pad bytes from one cell slot.
pub fn trim_padding(slot: &[u8], pad: u8) -> &[u8] {
    let end = slot
        .iter()
        .rposition(|&b| b != pad)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    &slot[..end]
}

/// Split a chunk payload into its cell slots, dropping slots that were
/// never written.
pub fn split_cells(payload: &[u8], pad: u8) -> Vec<Vec<u8>> {
    payload
        .chunks(MAX_BYTES_PER_CELL as usize)
        .map(|slot| trim_padding(slot, pad))
        .filter(|body| !body.is_empty())
        .map(|body| body.to_vec())
        .collect()
}

/// Build the document envelope out of cell bodies and the (possibly empty)
/// meta cell content.
pub fn assemble(cells: &[Vec<u8>], meta: &[u8]) -> Vec<u8> {
    let mut out = HEADER.to_vec();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(cell);
    }
    out.push(b']');
    if !meta.is_empty() {
        out.push(b',');
        out.extend_from_slice(meta);
    }
    out.push(b'}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetfs_proto::{BYTES_PER_CHUNK, DEFAULT_PADDING};

    #[test]
    fn test_empty_sheet_envelope() {
        assert_eq!(assemble(&[], b""), b"{\"celldata\": []}");
    }

    #[test]
    fn test_trim_padding_keeps_interior_bytes() {
        assert_eq!(trim_padding(b"a b   ", b' '), b"a b");
        assert_eq!(trim_padding(b"      ", b' '), b"");
        assert_eq!(trim_padding(b"x", b' '), b"x");
    }

    #[test]
    fn test_split_recovers_written_slots() {
        let mut payload = vec![DEFAULT_PADDING; BYTES_PER_CHUNK as usize];
        payload[..3].copy_from_slice(b"{a}");
        // Slot 1 left unwritten; slot 2 carries a value.
        let off = 2 * MAX_BYTES_PER_CELL as usize;
        payload[off..off + 3].copy_from_slice(b"{b}");

        let cells = split_cells(&payload, DEFAULT_PADDING);
        assert_eq!(cells, vec![b"{a}".to_vec(), b"{b}".to_vec()]);
    }

    #[test]
    fn test_envelope_with_meta() {
        let cells = vec![b"{\"r\":0}".to_vec(), b"{\"r\":1}".to_vec()];
        let out = assemble(&cells, b"\"name\": \"sheet one\"");
        assert_eq!(
            out,
            b"{\"celldata\": [{\"r\":0},{\"r\":1}],\"name\": \"sheet one\"}".to_vec()
        );
    }
}
