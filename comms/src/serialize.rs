/// Writes a value into `buf`, optionally handing back a trailing slice to be
/// written right after it without copying.
pub trait Serialize<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
