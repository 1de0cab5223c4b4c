//! Record and pointer-table relocation through a session

mod common;

use common::{offset, put, read_u32, Fixture, RECORD_POINTER};
use romcart::{
    Address, ByteRange, PointerRef, PointerTable, PointerValue, RomError, TableLayout, Window,
    MIN_IMAGE_SIZE,
};

#[test]
fn test_record_on_full_image_lands_in_grown_space() {
    let mut data = vec![0xFF; MIN_IMAGE_SIZE as usize];
    put(&mut data, 0x0800_0000 + RECORD_POINTER as u32, &0x0800_2000u32.to_le_bytes());
    data[0x2000..0x2800].fill(0x11);
    let fixture = Fixture::with_bytes(data);
    let mut session = fixture.open();

    let pointer = PointerRef::at_offset(RECORD_POINTER);
    let old = session.capture(pointer, 0x800).unwrap();
    assert_eq!(old, Some(ByteRange::new(Address(0x0800_2000), 0x800)));

    let result = session
        .save_record(old.as_slice(), &[0xAB; 0x1000], &[pointer], Window::image())
        .unwrap();

    let address = result.address().unwrap();
    let at = address.to_offset().unwrap();
    assert!((0x40_0000..0x200_0000).contains(&at));

    let on_disk = fixture.bytes();
    assert_eq!(on_disk.len(), 0x50_0000);
    assert_eq!(
        &on_disk[RECORD_POINTER..RECORD_POINTER + 4],
        &address.get().to_le_bytes()
    );
    assert!(on_disk[at..at + 0x1000].iter().all(|&b| b == 0xAB));
    assert!(on_disk[0x2000..0x2800].iter().all(|&b| b == 0));
}

#[test]
fn test_shrunk_record_reuses_its_own_space() {
    let fixture = Fixture::full();
    let pointer = PointerRef::at_offset(RECORD_POINTER);
    let old = ByteRange::new(Address::from_offset(0x4000), 0x400);
    let mut session = fixture.open();

    let result = session
        .save_record(&[old], &[0x22; 0x100], &[pointer], Window::image())
        .unwrap();

    assert_eq!(result, PointerValue::At(old.start));
    let on_disk = fixture.bytes();
    assert_eq!(on_disk.len(), MIN_IMAGE_SIZE as usize);
    assert!(on_disk[0x4100..0x4400].iter().all(|&b| b == 0));
}

#[test]
fn test_zero_length_record_uses_empty_sentinel() {
    let fixture = Fixture::full();
    let pointer = PointerRef::at_offset(RECORD_POINTER);
    let old = ByteRange::new(Address::from_offset(0x4000), 0x40);
    let mut session = fixture.open();

    let result = session
        .save_record(&[old], &[], &[pointer], Window::image())
        .unwrap();

    assert_eq!(result, PointerValue::Empty);
    let on_disk = fixture.bytes();
    assert_eq!(&on_disk[RECORD_POINTER..RECORD_POINTER + 4], &[1, 0, 0, 0]);
    assert!(on_disk[0x4000..0x4040].iter().all(|&b| b == 0));
    assert_eq!(on_disk.len(), MIN_IMAGE_SIZE as usize);
}

#[test]
fn test_shared_record_repoints_every_referrer() {
    let fixture = Fixture::vanilla();
    let refs = [PointerRef::at_offset(0x200), PointerRef::at_offset(0x300)];
    let mut session = fixture.open();

    let result = session
        .save_record(&[], &[0x33; 0x40], &refs, Window::image())
        .unwrap();

    let on_disk = fixture.bytes();
    for pointer in refs {
        assert_eq!(read_u32(&on_disk, pointer.address().get()), result.encode());
    }
}

#[test]
fn test_growing_table_is_replaced() {
    let fixture = Fixture::vanilla();
    let table_pointer = PointerRef::at_offset(0x400);
    let at = Address(0x0818_0000);
    let mut session = fixture.open();

    let first = PointerTable::new(vec![0x0800_1000, 0x0800_2000], Some(0xFFFF_FFFF));
    let placed = session
        .save_table(None, &first, &[table_pointer], Window::from(at))
        .unwrap();
    assert_eq!(placed, PointerValue::At(at));

    let mut grown = first.clone();
    grown.push(PointerValue::At(Address(0x0800_3000)));
    grown.set(4, PointerValue::Empty);
    let moved = session
        .save_table(Some(first.range_at(at)), &grown, &[table_pointer], Window::from(at))
        .unwrap();

    let image = session.image().unwrap();
    let new_at = image.read_pointer(table_pointer).unwrap().address().unwrap();
    assert_eq!(PointerValue::At(new_at), moved);
    let reread = PointerTable::read(image, new_at, TableLayout::Terminated(0xFFFF_FFFF)).unwrap();
    assert_eq!(reread, grown);
    assert_eq!(reread.get(3), Some(PointerValue::Unset));
    assert_eq!(reread.get(4), Some(PointerValue::Empty));
}

#[test]
fn test_same_length_table_is_rewritten_in_place() {
    let fixture = Fixture::vanilla();
    let table_pointer = PointerRef::at_offset(0x400);
    let at = Address(0x0818_0000);
    let mut session = fixture.open();

    let mut table = PointerTable::new(vec![0x0800_1000; 4], None);
    session
        .save_table(None, &table, &[table_pointer], Window::from(at))
        .unwrap();

    table.set(2, PointerValue::At(Address(0x0800_9000)));
    let result = session
        .save_table(Some(table.range_at(at)), &table, &[table_pointer], Window::image())
        .unwrap();

    assert_eq!(result, PointerValue::At(at));
    let on_disk = fixture.bytes();
    assert_eq!(read_u32(&on_disk, 0x0818_0008), 0x0800_9000);
}

#[test]
fn test_exhausted_bounded_window_rolls_back() {
    let fixture = Fixture::full();
    let before = fixture.bytes();
    let pointer = PointerRef::at_offset(RECORD_POINTER);
    let mut session = fixture.open();

    // Release a small range inside the window, then ask for more than fits
    let window = Window::bounded(Address(0x0800_4000), Address(0x0800_5000));
    let result = session.save_record(
        &[ByteRange::new(Address(0x0800_4000), 0x100)],
        &[0x44; 0x200],
        &[pointer],
        window,
    );

    assert!(matches!(result, Err(RomError::WindowExhausted { .. })));
    assert_eq!(fixture.bytes(), before);
    assert_eq!(session.image().unwrap().as_bytes(), before.as_slice());
    assert_eq!(offset(0x0800_4000), 0x4000);
}

#[test]
fn test_record_with_trailing_zeros_is_not_overwritten() {
    let fixture = Fixture::vanilla();
    let mut session = fixture.open();
    let first = [0xAA, 0, 0, 0, 0, 0, 0, 0];

    let a = session
        .save_record(&[], &first, &[PointerRef::at_offset(0x100)], Window::image())
        .unwrap()
        .address()
        .unwrap();
    let b = session
        .save_record(&[], &[0xBB; 4], &[PointerRef::at_offset(0x200)], Window::image())
        .unwrap()
        .address()
        .unwrap();

    assert!(b >= a.checked_add(first.len()).unwrap());
    let image = session.image().unwrap();
    assert_eq!(image.read(a, first.len()).unwrap(), &first);
    assert_eq!(image.read(b, 4).unwrap(), &[0xBB; 4]);
}

#[test]
fn test_zero_terminated_table_keeps_its_tail() {
    let fixture = Fixture::vanilla();
    let mut session = fixture.open();
    let table = PointerTable::new(vec![0x0800_1000, 0, 0], Some(0));

    let table_at = session
        .save_table(None, &table, &[PointerRef::at_offset(0x400)], Window::image())
        .unwrap()
        .address()
        .unwrap();
    let record_at = session
        .save_record(&[], &[0x5C; 8], &[PointerRef::at_offset(0x500)], Window::image())
        .unwrap()
        .address()
        .unwrap();

    let table_range = table.range_at(table_at);
    assert!(!table_range.overlaps(&ByteRange::new(record_at, 8)));
    let reread = PointerTable::read(session.image().unwrap(), table_at, TableLayout::Counted(4))
        .unwrap();
    assert_eq!(reread.entries, vec![0x0800_1000, 0, 0, 0]);
}

#[test]
fn test_captured_record_is_not_placed_over() {
    let mut data = vec![0xFF; MIN_IMAGE_SIZE as usize];
    put(&mut data, 0x0800_0000 + RECORD_POINTER as u32, &0x0800_2000u32.to_le_bytes());
    // Loaded record that is mostly zero bytes
    data[0x2000..0x2040].fill(0);
    data[0x2000] = 0x77;
    let fixture = Fixture::with_bytes(data);
    let mut session = fixture.open();

    let record = session
        .capture(PointerRef::at_offset(RECORD_POINTER), 0x40)
        .unwrap()
        .unwrap();
    let other = session
        .save_record(&[], &[0x99; 0x10], &[PointerRef::at_offset(0x200)], Window::image())
        .unwrap()
        .address()
        .unwrap();

    assert!(!record.overlaps(&ByteRange::new(other, 0x10)));
    assert_eq!(session.image().unwrap().as_bytes()[0x2001..0x2040], [0u8; 0x3F]);
}

#[test]
fn test_rolled_back_placement_frees_its_space() {
    let fixture = Fixture::vanilla();
    let mut session = fixture.open();
    let pointer = PointerRef::at_offset(0x100);

    let failed: romcart::Result<()> = session.transact(|image, relocator| {
        relocator.save_record(image, &[], &[0x12; 0x10], &[pointer], Window::image())?;
        Err(RomError::Fault("abort".to_string()))
    });
    assert!(failed.is_err());

    // Same data lands where the rolled-back copy was
    let retried = session
        .save_record(&[], &[0x12; 0x10], &[pointer], Window::image())
        .unwrap();
    assert_eq!(retried, PointerValue::At(Address(0x0818_0000)));
}
