//! Loader round-trip tests over synthetic module images.

use cs_ir::{Note, OrderEntry, SampleData, SamplePayload, VolumeCommand};

/// Align to the next 16-byte paragraph, returning the para index.
fn para_align(data: &mut Vec<u8>) -> u16 {
    while data.len() % 16 != 0 {
        data.push(0);
    }
    (data.len() / 16) as u16
}

fn build_mod() -> Vec<u8> {
    let mut data = vec![0u8; 1084];
    data[..12].copy_from_slice(b"scenario one");
    // 31 sample headers at offset 20; all empty but named
    for i in 0..31 {
        let base = 20 + i * 30;
        data[base] = b'0' + (i % 10) as u8;
        data[base + 25] = 48; // default volume
    }
    data[950] = 64; // song length
    data[951] = 0; // restart
    for i in 0..64 {
        data[952 + i] = (i % 16) as u8;
    }
    data[1080..1084].copy_from_slice(b"M.K.");
    // 16 patterns of silence
    data.extend(std::iter::repeat(0u8).take(16 * 1024));
    data
}

#[test]
fn mod_header_round_trip() {
    let song = cs_formats::load_mod(&build_mod()).unwrap();
    assert_eq!(song.num_channels(), 4);
    assert_eq!(song.samples.len(), 31);
    assert_eq!(song.orders.len(), 64);
    assert_eq!(song.patterns.len(), 16);
    assert_eq!(song.title, "scenario one");
    assert_eq!(song.initial_speed, 6);
    assert_eq!(song.initial_tempo, 125);
    // Order list survives byte-for-byte
    for (i, entry) in song.orders.iter().enumerate() {
        assert_eq!(*entry, OrderEntry::Pattern((i % 16) as u8));
    }
    // Sample headers round-trip
    assert_eq!(song.samples[3].default_volume, 48);
}

#[test]
fn truncated_mod_is_rejected() {
    let data = build_mod();
    assert!(cs_formats::load_mod(&data[..1000]).is_err());
    // Cutting into the pattern data fails the pattern read
    assert!(cs_formats::load_mod(&data[..1084 + 512]).is_err());
}

fn build_s3m() -> Vec<u8> {
    let mut data = Vec::new();
    let mut name = [0u8; 28];
    name[..8].copy_from_slice(b"scream 3");
    data.extend(name);
    data.push(0x1a);
    data.push(16);
    data.extend([0, 0]);
    data.extend(2u16.to_le_bytes()); // orders
    data.extend(1u16.to_le_bytes()); // samples
    data.extend(1u16.to_le_bytes()); // patterns
    data.extend(0u16.to_le_bytes()); // flags
    data.extend(0x1320u16.to_le_bytes()); // created with
    data.extend(2u16.to_le_bytes()); // unsigned samples
    data.extend(b"SCRM");
    data.push(48); // global volume
    data.push(5); // initial speed
    data.push(130); // initial tempo
    data.push(0xb0); // master volume, stereo
    data.push(0);
    data.push(0); // no panning block
    data.extend([0u8; 8]);
    data.extend([0u8; 2]); // special
    // Channel settings: six live channels, the seventh is the first
    // disabled one
    let mut settings = [0xffu8; 32];
    settings[..6].copy_from_slice(&[0, 1, 2, 8, 9, 10]);
    settings[6] = 0x80;
    data.extend(settings);
    assert_eq!(data.len(), 96);
    // Orders
    data.extend([0, 255]);
    let sample_ptr_pos = data.len();
    data.extend([0u8; 2]); // sample ptr, patched below
    let pattern_ptr_pos = data.len();
    data.extend([0u8; 2]); // pattern ptr, patched below

    // Sample record
    let sample_para = para_align(&mut data);
    data[sample_ptr_pos..sample_ptr_pos + 2].copy_from_slice(&sample_para.to_le_bytes());
    let record_start = data.len();
    data.push(1); // PCM sample
    data.extend([0u8; 12]); // filename
    let memseg_pos = data.len();
    data.extend([0u8; 3]); // memseg, patched below
    data.extend(16u32.to_le_bytes()); // length
    data.extend(0u32.to_le_bytes()); // loop start
    data.extend(16u32.to_le_bytes()); // loop end
    data.push(40); // volume
    data.push(0);
    data.push(0);
    data.push(0x01); // looped
    data.extend(8363u32.to_le_bytes());
    data.extend([0u8; 12]);
    let mut sample_name = [0u8; 28];
    sample_name[..5].copy_from_slice(b"pulse");
    data.extend(sample_name);
    data.extend(b"SCRS");
    assert_eq!(data.len() - record_start, 80);

    // Pattern
    let pattern_para = para_align(&mut data);
    data[pattern_ptr_pos..pattern_ptr_pos + 2].copy_from_slice(&pattern_para.to_le_bytes());
    data.extend(8u16.to_le_bytes()); // packed length
    // Row 0, channel 0: note C-4, sample 1, volume 33
    data.push(0x20 | 0x40);
    data.push(0x30);
    data.push(1);
    data.push(33);
    data.push(0); // end row 0
    data.extend(std::iter::repeat(0u8).take(63));

    // PCM, unsigned bytes
    let pcm_para = para_align(&mut data);
    data[memseg_pos] = 0;
    data[memseg_pos + 1..memseg_pos + 3].copy_from_slice(&pcm_para.to_le_bytes());
    data.extend((0..16u8).map(|i| 0x80 + i));
    data
}

#[test]
fn s3m_channel_count_from_settings() {
    let song = cs_formats::load_s3m(&build_s3m()).unwrap();
    assert_eq!(song.num_channels(), 6);
}

#[test]
fn s3m_header_round_trip() {
    let song = cs_formats::load_s3m(&build_s3m()).unwrap();
    assert_eq!(song.title, "scream 3");
    assert_eq!(song.global_volume, 48);
    assert_eq!(song.initial_speed, 5);
    assert_eq!(song.initial_tempo, 130);
    assert_eq!(song.orders, vec![OrderEntry::Pattern(0), OrderEntry::End]);
    assert!(!song.flags.fast_slides);

    let sample = &song.samples[0];
    assert_eq!(sample.name.as_str(), "pulse");
    assert_eq!(sample.default_volume, 40);
    assert_eq!(sample.length, 16);
    assert!(sample.has_loop());
}

#[test]
fn s3m_pattern_and_pcm_decode() {
    let song = cs_formats::load_s3m(&build_s3m()).unwrap();
    let cell = song.patterns[0].cell(0, 0);
    assert_eq!(cell.note, Note::On(49));
    assert_eq!(cell.sample, 1);
    assert_eq!(cell.volume, VolumeCommand::Volume(33));

    // Unsigned PCM converts to signed around zero
    let SamplePayload::Native(SampleData::Mono8(pcm)) = &song.samples[0].payload else {
        panic!("expected 8-bit PCM");
    };
    assert_eq!(&pcm[..4], &[0, 1, 2, 3]);
}

#[test]
fn s3m_bad_magic_is_rejected() {
    let mut data = build_s3m();
    data[44] = b'X';
    assert!(cs_formats::load_s3m(&data).is_err());
    // And the sniffing front door no longer recognises it
    assert!(cs_formats::detect(&data).is_none());
}

fn build_it() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(b"IMPM");
    let mut name = [0u8; 26];
    name[..7].copy_from_slice(b"impulse");
    data.extend(name);
    data.extend(4u16.to_le_bytes()); // highlight
    data.extend(2u16.to_le_bytes()); // orders
    data.extend(0u16.to_le_bytes()); // instruments
    data.extend(1u16.to_le_bytes()); // samples
    data.extend(1u16.to_le_bytes()); // patterns
    data.extend(0x0214u16.to_le_bytes()); // created with
    data.extend(0x0200u16.to_le_bytes()); // compatible with
    data.extend(0x0008u16.to_le_bytes()); // linear slides, sample mode
    data.extend(0u16.to_le_bytes()); // special
    data.push(96); // global volume
    data.push(0x80 | 48); // master volume, stereo
    data.push(4); // speed
    data.push(140); // tempo
    data.push(128); // separation
    data.push(0);
    data.extend(0u16.to_le_bytes()); // message length
    data.extend(0u32.to_le_bytes()); // message offset
    data.extend(0u32.to_le_bytes());
    let mut pans = [32u8; 64];
    for pan in pans.iter_mut().skip(6) {
        *pan = 200; // disabled past channel 6
    }
    data.extend(pans);
    data.extend([64u8; 64]);
    assert_eq!(data.len(), 192);
    data.extend([0, 255]); // orders
    let sample_ptr_pos = data.len();
    data.extend([0u8; 4]);
    let pattern_ptr_pos = data.len();
    data.extend([0u8; 4]);

    // Sample header
    let sample_offset = data.len() as u32;
    data[sample_ptr_pos..sample_ptr_pos + 4].copy_from_slice(&sample_offset.to_le_bytes());
    let record_start = data.len();
    data.extend(b"IMPS");
    data.extend([0u8; 12]);
    data.push(0);
    data.push(64); // global volume
    data.push(0x01 | 0x10); // has data, looped
    data.push(50); // volume
    let mut sample_name = [0u8; 26];
    sample_name[..3].copy_from_slice(b"saw");
    data.extend(sample_name);
    data.push(0x01); // signed PCM
    data.push(0);
    data.extend(8u32.to_le_bytes()); // length
    data.extend(0u32.to_le_bytes()); // loop start
    data.extend(8u32.to_le_bytes()); // loop end
    data.extend(16726u32.to_le_bytes()); // c5 speed
    data.extend(0u32.to_le_bytes());
    data.extend(0u32.to_le_bytes());
    let pointer_pos = data.len();
    data.extend([0u8; 4]); // sample pointer, patched below
    data.extend([0, 0, 0, 0]); // no auto-vibrato
    assert_eq!(data.len() - record_start, 80);

    // Pattern: row 0 carries a note, row 1 replays it via last-value
    let pattern_offset = data.len() as u32;
    data[pattern_ptr_pos..pattern_ptr_pos + 4].copy_from_slice(&pattern_offset.to_le_bytes());
    let mut packed = Vec::new();
    packed.push(1 | 0x80); // channel 0, mask follows
    packed.push(0x01 | 0x02 | 0x04); // note + sample + volume
    packed.push(48); // note C-4
    packed.push(1); // sample 1
    packed.push(64); // volume
    packed.push(0); // end row 0
    packed.push(1 | 0x80); // channel 0, new mask
    packed.push(0x10 | 0x20 | 0x40); // replay last note/sample/volume
    packed.push(0); // end row 1
    packed.extend(std::iter::repeat(0u8).take(62));
    data.extend((packed.len() as u16).to_le_bytes());
    data.extend(64u16.to_le_bytes());
    data.extend([0u8; 4]);
    data.extend(&packed);

    // PCM
    let pcm_offset = data.len() as u32;
    data[pointer_pos..pointer_pos + 4].copy_from_slice(&pcm_offset.to_le_bytes());
    data.extend((0..8).map(|i| (i * 4) as u8));
    data
}

#[test]
fn it_header_and_channels() {
    let song = cs_formats::load_it(&build_it()).unwrap();
    assert_eq!(song.title, "impulse");
    assert_eq!(song.num_channels(), 6);
    assert_eq!(song.global_volume, 96);
    assert_eq!(song.initial_speed, 4);
    assert_eq!(song.initial_tempo, 140);
    assert!(!song.flags.instrument_mode);
    assert!(!song.flags.amiga_slides);
    assert_eq!(song.orders, vec![OrderEntry::Pattern(0), OrderEntry::End]);
}

#[test]
fn it_sample_and_pattern_decode() {
    let song = cs_formats::load_it(&build_it()).unwrap();
    let sample = &song.samples[0];
    assert_eq!(sample.name.as_str(), "saw");
    assert_eq!(sample.c4_speed, 16726);
    assert_eq!(sample.length, 8);
    assert!(sample.has_loop());
    let SamplePayload::Native(SampleData::Mono8(pcm)) = &sample.payload else {
        panic!("expected 8-bit PCM");
    };
    assert_eq!(&pcm[..8], &[0, 4, 8, 12, 16, 20, 24, 28]);

    let pattern = &song.patterns[0];
    let first = pattern.cell(0, 0);
    assert_eq!(first.note, Note::On(49));
    assert_eq!(first.sample, 1);
    assert_eq!(first.volume, VolumeCommand::Volume(64));
    // The repeat-last row reproduces the stored values
    assert_eq!(pattern.cell(1, 0), first);
}

#[test]
fn it_bad_pointer_is_rejected() {
    let mut data = build_it();
    // Point the sample record past the end of the file
    let len = data.len() as u32 + 100;
    data[194..198].copy_from_slice(&len.to_le_bytes());
    assert!(cs_formats::load_it(&data).is_err());
}

fn build_stm() -> Vec<u8> {
    let mut data = Vec::new();
    let mut name = [0u8; 20];
    name[..6].copy_from_slice(b"scream");
    data.extend(name);
    data.extend(b"!Scream!\x1a");
    data.push(2); // type: module
    data.push(0x15); // version
    data.push(0x60); // initial speed, high nibble
    data.push(1); // patterns
    data.push(64); // global volume
    data.extend([0u8; 13]);
    assert_eq!(data.len(), 48);
    // 31 empty sample records
    for _ in 0..31 {
        let mut record = [0u8; 32];
        record[20..22].copy_from_slice(&0xffffu16.to_le_bytes()); // loop end: none
        data.extend(record);
    }
    assert_eq!(data.len(), 1040);
    // Orders: play pattern 0 then stop (99 terminates)
    let mut orders = [99u8; 128];
    orders[0] = 0;
    data.extend(orders);
    // One empty pattern
    let mut pattern = vec![0u8; 1024];
    // Row 0 channel 0: note C-4, sample 2, volume 40, no effect
    pattern[0] = 0x30;
    pattern[1] = (2 << 3) | (40 & 0x07);
    pattern[2] = (40 >> 3) << 4;
    data.extend(pattern);
    data
}

#[test]
fn stm_round_trip() {
    let song = cs_formats::load_stm(&build_stm()).unwrap();
    assert_eq!(song.title, "scream");
    assert_eq!(song.num_channels(), 4);
    assert_eq!(song.initial_speed, 6);
    assert_eq!(song.orders[0], OrderEntry::Pattern(0));
    assert_eq!(song.orders[1], OrderEntry::End);

    let cell = song.patterns[0].cell(0, 0);
    assert_eq!(cell.note, Note::On(49));
    assert_eq!(cell.sample, 2);
    assert_eq!(cell.volume, VolumeCommand::Volume(40));
}

#[test]
fn detect_distinguishes_formats() {
    use cs_formats::ModuleFormat;
    assert_eq!(cs_formats::detect(&build_mod()), Some(ModuleFormat::Mod));
    assert_eq!(cs_formats::detect(&build_s3m()), Some(ModuleFormat::S3m));
    assert_eq!(cs_formats::detect(&build_it()), Some(ModuleFormat::It));
    assert_eq!(cs_formats::detect(&build_stm()), Some(ModuleFormat::Stm));
    assert_eq!(cs_formats::detect(b"random junk"), None);
}

#[test]
fn load_module_dispatches_by_signature() {
    assert!(cs_formats::load_module(&build_mod()).is_ok());
    assert!(cs_formats::load_module(&build_s3m()).is_ok());
    assert!(cs_formats::load_module(&build_it()).is_ok());
    assert!(cs_formats::load_module(&build_stm()).is_ok());
}
