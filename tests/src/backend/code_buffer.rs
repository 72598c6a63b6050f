use arm_jit_core::CodeBuffer;

#[test]
fn emit_and_read() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u8(0x90);
    buf.emit_u32(0xDEAD_BEEF);
    assert_eq!(buf.offset(), 5);
    assert_eq!(buf.as_slice()[0], 0x90);
    assert_eq!(buf.read_u32(1), 0xDEAD_BEEF);
}

#[test]
fn patch() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(0);
    buf.patch_u32(0, 0x1234_5678);
    assert_eq!(buf.read_u32(0), 0x1234_5678);
}

#[test]
fn rounds_to_page_size() {
    let buf = CodeBuffer::new(1).unwrap();
    assert!(buf.capacity() >= 4096);
    assert_eq!(buf.remaining(), buf.capacity());
}

#[test]
fn permissions_toggle() {
    let buf = CodeBuffer::new(4096).unwrap();
    buf.set_executable().unwrap();
    buf.set_writable().unwrap();
}
