use benchtop_emu::{
    BinaryResponse, ByteOrder, Encoding, LineBuffer, Termination,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn ascii_round_trip(s in "[\\x00-\\x7f]*") {
        let bytes = Encoding::Ascii.encode(&s).unwrap();
        prop_assert_eq!(bytes.len(), s.len());
        prop_assert_eq!(Encoding::Ascii.decode(&bytes).unwrap(), s);
    }

    #[test]
    fn latin1_round_trip(s in "[\\x00-\\xff]*") {
        let bytes = Encoding::Latin1.encode(&s).unwrap();
        prop_assert_eq!(bytes.len(), s.chars().count());
        prop_assert_eq!(Encoding::Latin1.decode(&bytes).unwrap(), s);
    }

    #[test]
    fn utf8_round_trip(s in any::<String>()) {
        let bytes = Encoding::Utf8.encode(&s).unwrap();
        prop_assert_eq!(Encoding::Utf8.decode(&bytes).unwrap(), s);
    }

    #[test]
    fn non_ascii_rejected(s in "[a-z]*[\\x{80}-\\x{10FFFF}][a-z]*") {
        prop_assert!(Encoding::Ascii.encode(&s).is_err());
    }

    #[test]
    fn block_header_length(n in prop_oneof![0usize..=1, 2usize..2000]) {
        let payload = vec![0xA5u8; n];
        let block = BinaryResponse::new(payload.clone()).to_block().unwrap();
        let len = n.to_string();
        prop_assert_eq!(block[0], b'#');
        prop_assert_eq!(usize::from(block[1] - b'0'), len.len());
        prop_assert_eq!(&block[2..2 + len.len()], len.as_bytes());
        prop_assert_eq!(block.len(), 2 + len.len() + n);

        let (parsed, rest) = BinaryResponse::parse_block(&block).unwrap();
        prop_assert_eq!(parsed.payload(), &payload[..]);
        prop_assert!(rest.is_empty());
    }

    #[test]
    fn f32_block_recovers_values(
        v in proptest::collection::vec(-1e30f32..1e30, 0..64),
        little in any::<bool>(),
    ) {
        let order = if little { ByteOrder::Little } else { ByteOrder::Big };
        let b = BinaryResponse::from_f32(&v, order);
        prop_assert_eq!(b.payload().len(), v.len() * 4);
        prop_assert_eq!(b.to_f32(order).unwrap(), v);
    }

    #[test]
    fn line_buffer_reassembles(
        lines in proptest::collection::vec("[A-Z:?]{1,12}", 1..8),
        split in 1usize..16,
    ) {
        let mut wire = vec![];
        for l in &lines {
            wire.extend_from_slice(l.as_bytes());
            wire.extend_from_slice(b"\r\n");
        }
        let mut buf = LineBuffer::new(Termination::CrLf);
        let mut out = vec![];
        for chunk in wire.chunks(split) {
            buf.extend(chunk);
            while let Some(l) = buf.next_line() {
                out.push(l);
            }
        }
        prop_assert_eq!(out, lines);
    }
}
