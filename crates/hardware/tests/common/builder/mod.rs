/// Intel HEX record builder with computed checksums.
pub mod hex;
