//! 68000 instruction word decoding.
//!
//! Every possible 16-bit instruction word maps to a value-typed
//! [`Operation`]; the 65,536-entry table is precomputed once when a CPU
//! is constructed. Bit patterns outside the implemented set decode to
//! `Illegal` and raise the illegal-instruction exception when stepped.

/// Operand size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Size {
    Byte,
    #[default]
    Word,
    Long,
}

impl Size {
    /// Size in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Long => 4,
        }
    }

    /// Decode the common 2-bit size field (00 byte, 01 word, 10 long).
    fn from_bits(bits: u16) -> Option<Size> {
        match bits {
            0 => Some(Size::Byte),
            1 => Some(Size::Word),
            2 => Some(Size::Long),
            _ => None,
        }
    }
}

/// Effective-address mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddrMode {
    /// No operand in this slot
    #[default]
    None,
    /// Dn
    DataReg,
    /// An
    AddrReg,
    /// (An)
    Indirect,
    /// (An)+
    PostInc,
    /// -(An)
    PreDec,
    /// d16(An)
    Disp16,
    /// d8(An,Xn) with scale
    Index,
    /// (xxx).w
    AbsShort,
    /// (xxx).l
    AbsLong,
    /// d16(PC)
    PcDisp,
    /// d8(PC,Xn)
    PcIndex,
    /// #imm in extension words
    Immediate,
    /// Small immediate encoded in the opcode (reg field holds it)
    Quick,
}

impl AddrMode {
    fn from_bits(mode: u16, reg: u16) -> Option<AddrMode> {
        match mode {
            0 => Some(AddrMode::DataReg),
            1 => Some(AddrMode::AddrReg),
            2 => Some(AddrMode::Indirect),
            3 => Some(AddrMode::PostInc),
            4 => Some(AddrMode::PreDec),
            5 => Some(AddrMode::Disp16),
            6 => Some(AddrMode::Index),
            7 => match reg {
                0 => Some(AddrMode::AbsShort),
                1 => Some(AddrMode::AbsLong),
                2 => Some(AddrMode::PcDisp),
                3 => Some(AddrMode::PcIndex),
                4 => Some(AddrMode::Immediate),
                _ => None,
            },
            _ => None,
        }
    }

    fn is_alterable(self) -> bool {
        !matches!(
            self,
            AddrMode::PcDisp | AddrMode::PcIndex | AddrMode::Immediate | AddrMode::None
        )
    }

    fn is_data(self) -> bool {
        !matches!(self, AddrMode::AddrReg | AddrMode::None)
    }

    fn is_memory(self) -> bool {
        !matches!(self, AddrMode::DataReg | AddrMode::AddrReg | AddrMode::None)
    }

    fn is_control(self) -> bool {
        matches!(
            self,
            AddrMode::Indirect
                | AddrMode::Disp16
                | AddrMode::Index
                | AddrMode::AbsShort
                | AddrMode::AbsLong
                | AddrMode::PcDisp
                | AddrMode::PcIndex
        )
    }
}

/// Instruction kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpKind {
    #[default]
    Illegal,
    // Immediate ALU group
    Ori,
    OriCcr,
    OriSr,
    Andi,
    AndiCcr,
    AndiSr,
    Subi,
    Addi,
    Eori,
    EoriCcr,
    EoriSr,
    Cmpi,
    // Bit operations (dst holds the EA; src Dn or immediate bit number)
    Btst,
    Bchg,
    Bclr,
    Bset,
    Movep,
    // Moves
    Move,
    Movea,
    Moveq,
    MoveFromSr,
    MoveToCcr,
    MoveToSr,
    MoveUsp,
    Movem,
    // Single operand
    Negx,
    Clr,
    Neg,
    Not,
    Nbcd,
    Swap,
    Ext,
    Tst,
    Tas,
    Pea,
    // Flow control
    Lea,
    Jmp,
    Jsr,
    Bra,
    Bsr,
    Bcc,
    Dbcc,
    Scc,
    Rts,
    Rte,
    Rtr,
    Trap,
    Trapv,
    Link,
    Unlk,
    Chk,
    Stop,
    Reset,
    Nop,
    // Arithmetic and logic
    Addq,
    Subq,
    Add,
    Adda,
    Addx,
    Sub,
    Suba,
    Subx,
    Cmp,
    Cmpa,
    Cmpm,
    Eor,
    And,
    Or,
    Mulu,
    Muls,
    Divu,
    Divs,
    Abcd,
    Sbcd,
    Exg,
    // Shifts and rotates (src Quick/DataReg = count, dst = target)
    Asl,
    Asr,
    Lsl,
    Lsr,
    Roxl,
    Roxr,
    Rol,
    Ror,
}

/// A fully decoded instruction word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub size: Size,
    pub src: AddrMode,
    pub src_reg: u8,
    pub dst: AddrMode,
    pub dst_reg: u8,
    /// Condition code for Bcc/Scc/Dbcc, vector for Trap, opmode bits
    /// elsewhere
    pub flags: u8,
}

impl Operation {
    const ILLEGAL: Operation = Operation {
        kind: OpKind::Illegal,
        size: Size::Word,
        src: AddrMode::None,
        src_reg: 0,
        dst: AddrMode::None,
        dst_reg: 0,
        flags: 0,
    };

    fn new(kind: OpKind) -> Self {
        Operation { kind, ..Operation::ILLEGAL }
    }
}

/// The precomputed table for all 65,536 first words.
pub struct DecodeTable {
    table: Box<[Operation]>,
}

impl DecodeTable {
    pub fn new() -> Self {
        let table = (0..=u16::MAX).map(decode).collect::<Vec<_>>().into_boxed_slice();
        Self { table }
    }

    #[inline]
    pub fn lookup(&self, word: u16) -> Operation {
        self.table[word as usize]
    }
}

impl Default for DecodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one instruction word. Pure and total.
pub fn decode(word: u16) -> Operation {
    match word >> 12 {
        0x0 => decode_group_0(word),
        0x1 => decode_move(word, Size::Byte),
        0x2 => decode_move(word, Size::Long),
        0x3 => decode_move(word, Size::Word),
        0x4 => decode_group_4(word),
        0x5 => decode_group_5(word),
        0x6 => decode_group_6(word),
        0x7 => decode_moveq(word),
        0x8 => decode_group_8(word),
        0x9 => decode_group_9d(word, false),
        0xb => decode_group_b(word),
        0xc => decode_group_c(word),
        0xd => decode_group_9d(word, true),
        0xe => decode_group_e(word),
        _ => Operation::ILLEGAL, // line A and line F
    }
}

fn ea(word: u16) -> Option<(AddrMode, u8)> {
    let mode = (word >> 3) & 7;
    let reg = word & 7;
    AddrMode::from_bits(mode, reg).map(|m| (m, reg as u8))
}

/// Immediate ALU operations, static/dynamic bit operations, movep.
fn decode_group_0(word: u16) -> Operation {
    // movep: 0000 rrr 1xx 001 yyy
    if word & 0x0138 == 0x0108 {
        let mut op = Operation::new(OpKind::Movep);
        op.size = if word & 0x0040 != 0 { Size::Long } else { Size::Word };
        op.src_reg = ((word >> 9) & 7) as u8;
        op.dst_reg = (word & 7) as u8;
        // Direction: bit 7 set = register to memory
        op.flags = ((word >> 7) & 1) as u8;
        op.src = AddrMode::DataReg;
        op.dst = AddrMode::Disp16;
        return op;
    }

    // Dynamic bit operations: 0000 rrr 1ss eee
    if word & 0x0100 != 0 {
        let kind = match (word >> 6) & 3 {
            0 => OpKind::Btst,
            1 => OpKind::Bchg,
            2 => OpKind::Bclr,
            _ => OpKind::Bset,
        };
        let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
        let valid = if kind == OpKind::Btst {
            dst.is_data()
        } else {
            dst.is_data() && dst.is_alterable()
        };
        if !valid {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(kind);
        op.size = if dst == AddrMode::DataReg { Size::Long } else { Size::Byte };
        op.src = AddrMode::DataReg;
        op.src_reg = ((word >> 9) & 7) as u8;
        op.dst = dst;
        op.dst_reg = dst_reg;
        return op;
    }

    // Static bit operations: 0000 1000 ss eee
    if word & 0x0f00 == 0x0800 {
        let kind = match (word >> 6) & 3 {
            0 => OpKind::Btst,
            1 => OpKind::Bchg,
            2 => OpKind::Bclr,
            _ => OpKind::Bset,
        };
        let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
        let valid = if kind == OpKind::Btst {
            dst.is_data() && dst != AddrMode::Immediate
        } else {
            dst.is_data() && dst.is_alterable()
        };
        if !valid {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(kind);
        op.size = if dst == AddrMode::DataReg { Size::Long } else { Size::Byte };
        op.src = AddrMode::Immediate;
        op.dst = dst;
        op.dst_reg = dst_reg;
        return op;
    }

    // Immediate ALU: 0000 kkk0 ss eee
    let (kind, ccr_kind, sr_kind) = match (word >> 9) & 7 {
        0 => (OpKind::Ori, OpKind::OriCcr, OpKind::OriSr),
        1 => (OpKind::Andi, OpKind::AndiCcr, OpKind::AndiSr),
        2 => (OpKind::Subi, OpKind::Illegal, OpKind::Illegal),
        3 => (OpKind::Addi, OpKind::Illegal, OpKind::Illegal),
        5 => (OpKind::Eori, OpKind::EoriCcr, OpKind::EoriSr),
        6 => (OpKind::Cmpi, OpKind::Illegal, OpKind::Illegal),
        _ => return Operation::ILLEGAL,
    };
    let Some(size) = Size::from_bits((word >> 6) & 3) else { return Operation::ILLEGAL };

    // #imm,CCR and #imm,SR forms use the immediate EA encoding
    if word & 0x003f == 0x003c {
        let special = match size {
            Size::Byte => ccr_kind,
            Size::Word => sr_kind,
            Size::Long => OpKind::Illegal,
        };
        if special == OpKind::Illegal {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(special);
        op.size = size;
        op.src = AddrMode::Immediate;
        return op;
    }

    let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
    let valid = if kind == OpKind::Cmpi {
        dst.is_data() && dst != AddrMode::Immediate
    } else {
        dst.is_data() && dst.is_alterable()
    };
    if !valid {
        return Operation::ILLEGAL;
    }
    let mut op = Operation::new(kind);
    op.size = size;
    op.src = AddrMode::Immediate;
    op.dst = dst;
    op.dst_reg = dst_reg;
    op
}

/// move / movea with the destination field bit-swapped.
fn decode_move(word: u16, size: Size) -> Operation {
    let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
    let dst_mode = (word >> 6) & 7;
    let dst_reg = (word >> 9) & 7;
    let Some(dst) = AddrMode::from_bits(dst_mode, dst_reg) else { return Operation::ILLEGAL };

    // Byte moves cannot touch address registers
    if size == Size::Byte && (src == AddrMode::AddrReg || dst == AddrMode::AddrReg) {
        return Operation::ILLEGAL;
    }
    if dst == AddrMode::AddrReg {
        let mut op = Operation::new(OpKind::Movea);
        op.size = size;
        op.src = src;
        op.src_reg = src_reg;
        op.dst = AddrMode::AddrReg;
        op.dst_reg = dst_reg as u8;
        return op;
    }
    if !dst.is_alterable() {
        return Operation::ILLEGAL;
    }
    let mut op = Operation::new(OpKind::Move);
    op.size = size;
    op.src = src;
    op.src_reg = src_reg;
    op.dst = dst;
    op.dst_reg = dst_reg as u8;
    op
}

/// The miscellaneous 0100 group.
fn decode_group_4(word: u16) -> Operation {
    // Fixed encodings first
    match word {
        0x4afc => return Operation::ILLEGAL, // the ILLEGAL instruction
        0x4e70 => return Operation::new(OpKind::Reset),
        0x4e71 => return Operation::new(OpKind::Nop),
        0x4e72 => {
            let mut op = Operation::new(OpKind::Stop);
            op.src = AddrMode::Immediate;
            return op;
        }
        0x4e73 => return Operation::new(OpKind::Rte),
        0x4e75 => return Operation::new(OpKind::Rts),
        0x4e76 => return Operation::new(OpKind::Trapv),
        0x4e77 => return Operation::new(OpKind::Rtr),
        _ => {}
    }

    if word & 0xfff0 == 0x4e40 {
        let mut op = Operation::new(OpKind::Trap);
        op.flags = (word & 0x0f) as u8;
        return op;
    }
    if word & 0xfff8 == 0x4e50 {
        let mut op = Operation::new(OpKind::Link);
        op.dst_reg = (word & 7) as u8;
        op.src = AddrMode::Immediate;
        return op;
    }
    if word & 0xfff8 == 0x4e58 {
        let mut op = Operation::new(OpKind::Unlk);
        op.dst_reg = (word & 7) as u8;
        return op;
    }
    if word & 0xfff0 == 0x4e60 {
        let mut op = Operation::new(OpKind::MoveUsp);
        op.dst_reg = (word & 7) as u8;
        // Bit 3: 0 = An to USP, 1 = USP to An
        op.flags = ((word >> 3) & 1) as u8;
        return op;
    }
    if word & 0xffc0 == 0x4e80 {
        let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
        if !dst.is_control() {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(OpKind::Jsr);
        op.dst = dst;
        op.dst_reg = dst_reg;
        return op;
    }
    if word & 0xffc0 == 0x4ec0 {
        let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
        if !dst.is_control() {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(OpKind::Jmp);
        op.dst = dst;
        op.dst_reg = dst_reg;
        return op;
    }

    // lea: 0100 rrr 111 eee / chk: 0100 rrr 110 eee
    match (word >> 6) & 7 {
        7 => {
            let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
            if !src.is_control() {
                return Operation::ILLEGAL;
            }
            let mut op = Operation::new(OpKind::Lea);
            op.size = Size::Long;
            op.src = src;
            op.src_reg = src_reg;
            op.dst = AddrMode::AddrReg;
            op.dst_reg = ((word >> 9) & 7) as u8;
            return op;
        }
        6 => {
            let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
            if !src.is_data() {
                return Operation::ILLEGAL;
            }
            let mut op = Operation::new(OpKind::Chk);
            op.size = Size::Word;
            op.src = src;
            op.src_reg = src_reg;
            op.dst = AddrMode::DataReg;
            op.dst_reg = ((word >> 9) & 7) as u8;
            return op;
        }
        _ => {}
    }

    // movem: 0100 1d00 1s eee
    if word & 0xfb80 == 0x4880 && (word >> 3) & 7 != 0 {
        let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
        let to_registers = word & 0x0400 != 0;
        let valid = if to_registers {
            // Memory to registers: control or (An)+
            dst.is_control() && dst.is_alterable() || dst == AddrMode::PostInc
                || matches!(dst, AddrMode::PcDisp | AddrMode::PcIndex)
        } else {
            // Registers to memory: control alterable or -(An)
            dst.is_control() && dst.is_alterable() || dst == AddrMode::PreDec
        };
        if !valid {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(OpKind::Movem);
        op.size = if word & 0x0040 != 0 { Size::Long } else { Size::Word };
        op.dst = dst;
        op.dst_reg = dst_reg;
        op.flags = to_registers as u8;
        return op;
    }

    // ext: 0100 100 opm 000 rrr
    if word & 0xffb8 == 0x4880 {
        let mut op = Operation::new(OpKind::Ext);
        op.size = if word & 0x0040 != 0 { Size::Long } else { Size::Word };
        op.dst = AddrMode::DataReg;
        op.dst_reg = (word & 7) as u8;
        return op;
    }
    // swap: 0100 1000 0100 0rrr
    if word & 0xfff8 == 0x4840 {
        let mut op = Operation::new(OpKind::Swap);
        op.size = Size::Long;
        op.dst = AddrMode::DataReg;
        op.dst_reg = (word & 7) as u8;
        return op;
    }
    // pea: 0100 1000 01 eee
    if word & 0xffc0 == 0x4840 {
        let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
        if !src.is_control() {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(OpKind::Pea);
        op.size = Size::Long;
        op.src = src;
        op.src_reg = src_reg;
        return op;
    }
    // nbcd: 0100 1000 00 eee
    if word & 0xffc0 == 0x4800 {
        let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
        if !(dst.is_data() && dst.is_alterable()) {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(OpKind::Nbcd);
        op.size = Size::Byte;
        op.dst = dst;
        op.dst_reg = dst_reg;
        return op;
    }

    // negx/clr/neg/not with size 11 repurposed for the SR/CCR moves
    let kind = match (word >> 8) & 0x0f {
        0x0 => OpKind::Negx,
        0x2 => OpKind::Clr,
        0x4 => OpKind::Neg,
        0x6 => OpKind::Not,
        0xa => OpKind::Tst,
        _ => return Operation::ILLEGAL,
    };
    let size_bits = (word >> 6) & 3;
    if size_bits == 3 {
        let special = match kind {
            OpKind::Negx => OpKind::MoveFromSr,
            OpKind::Neg => OpKind::MoveToCcr,
            OpKind::Not => OpKind::MoveToSr,
            OpKind::Tst => OpKind::Tas,
            _ => OpKind::Illegal,
        };
        if special == OpKind::Illegal {
            return Operation::ILLEGAL;
        }
        let Some((target, target_reg)) = ea(word) else { return Operation::ILLEGAL };
        let mut op = Operation::new(special);
        match special {
            OpKind::MoveFromSr | OpKind::Tas => {
                if !(target.is_data() && target.is_alterable()) {
                    return Operation::ILLEGAL;
                }
                op.size = if special == OpKind::Tas { Size::Byte } else { Size::Word };
                op.dst = target;
                op.dst_reg = target_reg;
            }
            _ => {
                if !target.is_data() {
                    return Operation::ILLEGAL;
                }
                op.size = Size::Word;
                op.src = target;
                op.src_reg = target_reg;
            }
        }
        return op;
    }
    let Some(size) = Size::from_bits(size_bits) else { return Operation::ILLEGAL };
    let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
    if !(dst.is_data() && dst.is_alterable()) {
        return Operation::ILLEGAL;
    }
    let mut op = Operation::new(kind);
    op.size = size;
    op.dst = dst;
    op.dst_reg = dst_reg;
    op
}

/// addq/subq, scc, dbcc.
fn decode_group_5(word: u16) -> Operation {
    let size_bits = (word >> 6) & 3;
    if size_bits == 3 {
        let condition = ((word >> 8) & 0x0f) as u8;
        if word & 0x0038 == 0x0008 {
            let mut op = Operation::new(OpKind::Dbcc);
            op.size = Size::Word;
            op.dst = AddrMode::DataReg;
            op.dst_reg = (word & 7) as u8;
            op.flags = condition;
            return op;
        }
        let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
        if !(dst.is_data() && dst.is_alterable()) {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(OpKind::Scc);
        op.size = Size::Byte;
        op.dst = dst;
        op.dst_reg = dst_reg;
        op.flags = condition;
        return op;
    }

    let Some(size) = Size::from_bits(size_bits) else { return Operation::ILLEGAL };
    let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
    if !dst.is_alterable() || (dst == AddrMode::AddrReg && size == Size::Byte) {
        return Operation::ILLEGAL;
    }
    let kind = if word & 0x0100 != 0 { OpKind::Subq } else { OpKind::Addq };
    let mut op = Operation::new(kind);
    op.size = size;
    op.src = AddrMode::Quick;
    // Quick data 1-8 (0 encodes 8)
    let data = ((word >> 9) & 7) as u8;
    op.src_reg = if data == 0 { 8 } else { data };
    op.dst = dst;
    op.dst_reg = dst_reg;
    op
}

/// bra/bsr/bcc with 8-, 16- and 32-bit displacements.
fn decode_group_6(word: u16) -> Operation {
    let condition = ((word >> 8) & 0x0f) as u8;
    let displacement = (word & 0xff) as u8;
    let kind = match condition {
        0 => OpKind::Bra,
        1 => OpKind::Bsr,
        _ => OpKind::Bcc,
    };
    let mut op = Operation::new(kind);
    op.flags = condition;
    // flags in src_reg: displacement byte (0x00 = word follows,
    // 0xff = long follows)
    op.src_reg = displacement;
    op
}

fn decode_moveq(word: u16) -> Operation {
    if word & 0x0100 != 0 {
        return Operation::ILLEGAL;
    }
    let mut op = Operation::new(OpKind::Moveq);
    op.size = Size::Long;
    op.src = AddrMode::Quick;
    op.src_reg = (word & 0xff) as u8;
    op.dst = AddrMode::DataReg;
    op.dst_reg = ((word >> 9) & 7) as u8;
    op
}

/// or/divu/divs/sbcd.
fn decode_group_8(word: u16) -> Operation {
    let opmode = (word >> 6) & 7;
    match opmode {
        3 | 7 => {
            let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
            if !src.is_data() {
                return Operation::ILLEGAL;
            }
            let mut op = Operation::new(if opmode == 3 { OpKind::Divu } else { OpKind::Divs });
            op.size = Size::Word;
            op.src = src;
            op.src_reg = src_reg;
            op.dst = AddrMode::DataReg;
            op.dst_reg = ((word >> 9) & 7) as u8;
            op
        }
        4 if word & 0x0030 == 0 => {
            let mut op = Operation::new(OpKind::Sbcd);
            op.size = Size::Byte;
            op.src = if word & 8 != 0 { AddrMode::PreDec } else { AddrMode::DataReg };
            op.src_reg = (word & 7) as u8;
            op.dst = op.src;
            op.dst_reg = ((word >> 9) & 7) as u8;
            op
        }
        _ => decode_dual_alu(word, OpKind::Or),
    }
}

/// sub/subx/suba (group 9) and add/addx/adda (group D).
fn decode_group_9d(word: u16, is_add: bool) -> Operation {
    let opmode = (word >> 6) & 7;
    if opmode == 3 || opmode == 7 {
        let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
        let mut op = Operation::new(if is_add { OpKind::Adda } else { OpKind::Suba });
        op.size = if opmode == 7 { Size::Long } else { Size::Word };
        op.src = src;
        op.src_reg = src_reg;
        op.dst = AddrMode::AddrReg;
        op.dst_reg = ((word >> 9) & 7) as u8;
        return op;
    }
    // addx/subx: 1x01 xxx 1ss 00m yyy
    if word & 0x0130 == 0x0100 {
        let Some(size) = Size::from_bits((word >> 6) & 3) else { return Operation::ILLEGAL };
        let mut op = Operation::new(if is_add { OpKind::Addx } else { OpKind::Subx });
        op.size = size;
        op.src = if word & 8 != 0 { AddrMode::PreDec } else { AddrMode::DataReg };
        op.src_reg = (word & 7) as u8;
        op.dst = op.src;
        op.dst_reg = ((word >> 9) & 7) as u8;
        return op;
    }
    decode_dual_alu(word, if is_add { OpKind::Add } else { OpKind::Sub })
}

/// cmp/cmpa/cmpm/eor.
fn decode_group_b(word: u16) -> Operation {
    let opmode = (word >> 6) & 7;
    if opmode == 3 || opmode == 7 {
        let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
        let mut op = Operation::new(OpKind::Cmpa);
        op.size = if opmode == 7 { Size::Long } else { Size::Word };
        op.src = src;
        op.src_reg = src_reg;
        op.dst = AddrMode::AddrReg;
        op.dst_reg = ((word >> 9) & 7) as u8;
        return op;
    }
    if opmode < 3 {
        let Some(size) = Size::from_bits(opmode) else { return Operation::ILLEGAL };
        let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
        if size == Size::Byte && src == AddrMode::AddrReg {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(OpKind::Cmp);
        op.size = size;
        op.src = src;
        op.src_reg = src_reg;
        op.dst = AddrMode::DataReg;
        op.dst_reg = ((word >> 9) & 7) as u8;
        return op;
    }
    // cmpm: 1011 xxx 1ss 001 yyy
    if word & 0x0038 == 0x0008 {
        let Some(size) = Size::from_bits((word >> 6) & 3) else { return Operation::ILLEGAL };
        let mut op = Operation::new(OpKind::Cmpm);
        op.size = size;
        op.src = AddrMode::PostInc;
        op.src_reg = (word & 7) as u8;
        op.dst = AddrMode::PostInc;
        op.dst_reg = ((word >> 9) & 7) as u8;
        return op;
    }
    // eor: Dn is the source, the EA the destination
    let Some(size) = Size::from_bits((word >> 6) & 3) else { return Operation::ILLEGAL };
    let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
    if !(dst.is_data() && dst.is_alterable()) {
        return Operation::ILLEGAL;
    }
    let mut op = Operation::new(OpKind::Eor);
    op.size = size;
    op.src = AddrMode::DataReg;
    op.src_reg = ((word >> 9) & 7) as u8;
    op.dst = dst;
    op.dst_reg = dst_reg;
    op
}

/// and/mulu/muls/abcd/exg.
fn decode_group_c(word: u16) -> Operation {
    let opmode = (word >> 6) & 7;
    match opmode {
        3 | 7 => {
            let Some((src, src_reg)) = ea(word) else { return Operation::ILLEGAL };
            if !src.is_data() {
                return Operation::ILLEGAL;
            }
            let mut op = Operation::new(if opmode == 3 { OpKind::Mulu } else { OpKind::Muls });
            op.size = Size::Word;
            op.src = src;
            op.src_reg = src_reg;
            op.dst = AddrMode::DataReg;
            op.dst_reg = ((word >> 9) & 7) as u8;
            op
        }
        4 if word & 0x0030 == 0 => {
            let mut op = Operation::new(OpKind::Abcd);
            op.size = Size::Byte;
            op.src = if word & 8 != 0 { AddrMode::PreDec } else { AddrMode::DataReg };
            op.src_reg = (word & 7) as u8;
            op.dst = op.src;
            op.dst_reg = ((word >> 9) & 7) as u8;
            op
        }
        5 | 6 if word & 0x0030 == 0 || word & 0x00f8 == 0x0088 => {
            // exg: opmodes 01000 (Dn,Dn), 01001 (An,An), 10001 (Dn,An)
            let mode = (word >> 3) & 0x1f;
            let (src, dst) = match mode {
                0x08 => (AddrMode::DataReg, AddrMode::DataReg),
                0x09 => (AddrMode::AddrReg, AddrMode::AddrReg),
                0x11 => (AddrMode::DataReg, AddrMode::AddrReg),
                _ => return Operation::ILLEGAL,
            };
            let mut op = Operation::new(OpKind::Exg);
            op.size = Size::Long;
            op.src = src;
            op.src_reg = ((word >> 9) & 7) as u8;
            op.dst = dst;
            op.dst_reg = (word & 7) as u8;
            op
        }
        _ => decode_dual_alu(word, OpKind::And),
    }
}

/// The shared `op <ea>,Dn` / `op Dn,<ea>` encoding for add/sub/and/or.
fn decode_dual_alu(word: u16, kind: OpKind) -> Operation {
    let opmode = (word >> 6) & 7;
    let Some(size) = Size::from_bits(opmode & 3) else { return Operation::ILLEGAL };
    let register = ((word >> 9) & 7) as u8;
    let Some((ea_mode, ea_reg)) = ea(word) else { return Operation::ILLEGAL };
    let to_ea = opmode & 4 != 0;

    let logic = matches!(kind, OpKind::And | OpKind::Or | OpKind::Eor);
    if to_ea {
        // Dn op <ea> -> <ea>: memory alterable only
        if !(ea_mode.is_memory() && ea_mode.is_alterable()) {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(kind);
        op.size = size;
        op.src = AddrMode::DataReg;
        op.src_reg = register;
        op.dst = ea_mode;
        op.dst_reg = ea_reg;
        op
    } else {
        // <ea> op Dn -> Dn
        if ea_mode == AddrMode::AddrReg && (size == Size::Byte || logic) {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(kind);
        op.size = size;
        op.src = ea_mode;
        op.src_reg = ea_reg;
        op.dst = AddrMode::DataReg;
        op.dst_reg = register;
        op
    }
}

/// Shifts and rotates.
fn decode_group_e(word: u16) -> Operation {
    let size_bits = (word >> 6) & 3;
    let left = word & 0x0100 != 0;
    if size_bits == 3 {
        // Memory form: one-bit shift on a word EA
        let kind = match ((word >> 9) & 7, left) {
            (0, false) => OpKind::Asr,
            (0, true) => OpKind::Asl,
            (1, false) => OpKind::Lsr,
            (1, true) => OpKind::Lsl,
            (2, false) => OpKind::Roxr,
            (2, true) => OpKind::Roxl,
            (3, false) => OpKind::Ror,
            (3, true) => OpKind::Rol,
            _ => return Operation::ILLEGAL,
        };
        let Some((dst, dst_reg)) = ea(word) else { return Operation::ILLEGAL };
        if !(dst.is_memory() && dst.is_alterable()) {
            return Operation::ILLEGAL;
        }
        let mut op = Operation::new(kind);
        op.size = Size::Word;
        op.src = AddrMode::Quick;
        op.src_reg = 1;
        op.dst = dst;
        op.dst_reg = dst_reg;
        return op;
    }

    let Some(size) = Size::from_bits(size_bits) else { return Operation::ILLEGAL };
    let kind = match ((word >> 3) & 3, left) {
        (0, false) => OpKind::Asr,
        (0, true) => OpKind::Asl,
        (1, false) => OpKind::Lsr,
        (1, true) => OpKind::Lsl,
        (2, false) => OpKind::Roxr,
        (2, true) => OpKind::Roxl,
        (3, false) => OpKind::Ror,
        (3, true) => OpKind::Rol,
        _ => unreachable!(),
    };
    let mut op = Operation::new(kind);
    op.size = size;
    if word & 0x0020 != 0 {
        // Count in a data register
        op.src = AddrMode::DataReg;
        op.src_reg = ((word >> 9) & 7) as u8;
    } else {
        // Immediate count 1-8
        op.src = AddrMode::Quick;
        let count = ((word >> 9) & 7) as u8;
        op.src_reg = if count == 0 { 8 } else { count };
    }
    op.dst = AddrMode::DataReg;
    op.dst_reg = (word & 7) as u8;
    op
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_is_total_and_deterministic() {
        let table = DecodeTable::new();
        for word in 0..=u16::MAX {
            assert_eq!(table.lookup(word), decode(word));
        }
    }

    #[test]
    fn line_a_and_line_f_are_illegal() {
        for word in [0xa000u16, 0xa123, 0xafff, 0xf000, 0xf789, 0xffff] {
            assert_eq!(decode(word).kind, OpKind::Illegal);
        }
    }

    #[test]
    fn known_fixed_encodings() {
        assert_eq!(decode(0x4e75).kind, OpKind::Rts);
        assert_eq!(decode(0x4e73).kind, OpKind::Rte);
        assert_eq!(decode(0x4e71).kind, OpKind::Nop);
        assert_eq!(decode(0x4e77).kind, OpKind::Rtr);
        assert_eq!(decode(0x4afc).kind, OpKind::Illegal);
    }

    #[test]
    fn moveq_decodes_value() {
        // moveq #5,d0 = 0x7005
        let op = decode(0x7005);
        assert_eq!(op.kind, OpKind::Moveq);
        assert_eq!(op.src_reg, 5);
        assert_eq!(op.dst_reg, 0);
        // Bit 8 set is not moveq
        assert_eq!(decode(0x7105).kind, OpKind::Illegal);
    }

    #[test]
    fn addq_variants() {
        // addq.b #5,d4 = 0x5a04
        let op = decode(0x5a04);
        assert_eq!(op.kind, OpKind::Addq);
        assert_eq!(op.size, Size::Byte);
        assert_eq!(op.src_reg, 5);
        assert_eq!(op.dst, AddrMode::DataReg);
        assert_eq!(op.dst_reg, 4);
        // addq.w #4,a0 = 0x5848
        let op = decode(0x5848);
        assert_eq!(op.kind, OpKind::Addq);
        assert_eq!(op.dst, AddrMode::AddrReg);
        assert_eq!(op.src_reg, 4);
        // addq.l #8,d3 = 0x5083 (count 0 encodes 8)
        let op = decode(0x5083);
        assert_eq!(op.src_reg, 8);
        assert_eq!(op.size, Size::Long);
        // addq.b to An is invalid
        assert_eq!(decode(0x5a08 | 0).kind, OpKind::Illegal);
    }

    #[test]
    fn branch_forms() {
        let op = decode(0x6050); // bra.s +0x50
        assert_eq!(op.kind, OpKind::Bra);
        assert_eq!(op.src_reg, 0x50);
        let op = decode(0x6000); // bra.w
        assert_eq!(op.src_reg, 0x00);
        let op = decode(0x60ff); // bra.l
        assert_eq!(op.src_reg, 0xff);
        let op = decode(0x6100); // bsr.w
        assert_eq!(op.kind, OpKind::Bsr);
        let op = decode(0x6704); // beq.s
        assert_eq!(op.kind, OpKind::Bcc);
        assert_eq!(op.flags, 7);
    }

    #[test]
    fn move_encodings() {
        // move.w d1,d0 = 0x3001
        let op = decode(0x3001);
        assert_eq!(op.kind, OpKind::Move);
        assert_eq!(op.size, Size::Word);
        // move.b a0,d0 is illegal
        assert_eq!(decode(0x1008).kind, OpKind::Illegal);
        // movea.l d0,a1 = 0x2240
        let op = decode(0x2240);
        assert_eq!(op.kind, OpKind::Movea);
        assert_eq!(op.size, Size::Long);
        // move.w d0,(xxx).w = 0x31c0
        let op = decode(0x31c0);
        assert_eq!(op.dst, AddrMode::AbsShort);
        // move to a PC-relative destination is illegal
        assert_eq!(decode(0x35c0).kind, OpKind::Illegal);
    }

    #[test]
    fn shift_register_and_immediate_counts() {
        // lsl.w #2,d1 = 1110 010 1 01 0 01 001 = 0xe549
        let op = decode(0xe549);
        assert_eq!(op.kind, OpKind::Lsl);
        assert_eq!(op.src, AddrMode::Quick);
        assert_eq!(op.src_reg, 2);
        // asr.l d2,d3 = 1110 010 0 10 1 00 011 = 0xe4a3
        let op = decode(0xe4a3);
        assert_eq!(op.kind, OpKind::Asr);
        assert_eq!(op.src, AddrMode::DataReg);
        assert_eq!(op.src_reg, 2);
        assert_eq!(op.dst_reg, 3);
    }

    #[test]
    fn immediate_group_and_special_targets() {
        // cmpi.w #n,d2 = 0x0c42
        let op = decode(0x0c42);
        assert_eq!(op.kind, OpKind::Cmpi);
        assert_eq!(op.src, AddrMode::Immediate);
        // ori #n,ccr = 0x003c
        assert_eq!(decode(0x003c).kind, OpKind::OriCcr);
        // andi #n,sr = 0x027c
        assert_eq!(decode(0x027c).kind, OpKind::AndiSr);
        // addi to an address register is illegal
        assert_eq!(decode(0x0648).kind, OpKind::Illegal);
    }

    #[test]
    fn dbcc_and_scc() {
        // dbra d0 = 0x51c8
        let op = decode(0x51c8);
        assert_eq!(op.kind, OpKind::Dbcc);
        assert_eq!(op.flags, 1);
        // seq d1 = 0x57c1
        let op = decode(0x57c1);
        assert_eq!(op.kind, OpKind::Scc);
        assert_eq!(op.flags, 7);
    }

    #[test]
    fn movem_and_ext_disambiguate() {
        // movem.w d0-d7/a0-a6,-(a7) = 0x48a7
        let op = decode(0x48a7);
        assert_eq!(op.kind, OpKind::Movem);
        assert_eq!(op.dst, AddrMode::PreDec);
        // ext.w d3 = 0x4883
        let op = decode(0x4883);
        assert_eq!(op.kind, OpKind::Ext);
        assert_eq!(op.size, Size::Word);
        // ext.l d3 = 0x48c3
        assert_eq!(decode(0x48c3).size, Size::Long);
        // movem.l (a0)+,d0-d7 = 0x4cd8
        let op = decode(0x4cd8);
        assert_eq!(op.kind, OpKind::Movem);
        assert_eq!(op.flags, 1);
    }

    #[test]
    fn jump_family_requires_control_ea() {
        assert_eq!(decode(0x4ed0).kind, OpKind::Jmp); // jmp (a0)
        assert_eq!(decode(0x4e90).kind, OpKind::Jsr); // jsr (a0)
        assert_eq!(decode(0x4ed8).kind, OpKind::Illegal); // jmp (a0)+
        assert_eq!(decode(0x4ec0).kind, OpKind::Illegal); // jmp d0
    }
}
