//! Common test utilities and helpers.
//!
//! Shared fixture builder for synthetic Delphi-like sections: the tests
//! craft sections by poking values at offsets, the way the real compiler
//! would have laid them out.

use sibyl::SectionMap;

/// Builds one synthetic section.
pub struct SectionBuilder {
    name: String,
    load: u32,
    bytes: Vec<u8>,
}

impl SectionBuilder {
    pub fn new(name: &str, load: u32, size: usize) -> Self {
        Self {
            name: name.to_string(),
            load,
            bytes: vec![0u8; size],
        }
    }

    pub fn put_u8(&mut self, at: u32, value: u8) -> &mut Self {
        self.bytes[at as usize] = value;
        self
    }

    pub fn put_u16(&mut self, at: u32, value: u16) -> &mut Self {
        self.bytes[at as usize..at as usize + 2].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u32(&mut self, at: u32, value: u32) -> &mut Self {
        self.bytes[at as usize..at as usize + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_pascal(&mut self, at: u32, text: &str) -> &mut Self {
        self.bytes[at as usize] = text.len() as u8;
        self.bytes[at as usize + 1..at as usize + 1 + text.len()]
            .copy_from_slice(text.as_bytes());
        self
    }

    /// Delphi-like entry stub at `at`: prologue, then `mov eax, table_va`.
    pub fn put_entry_stub(&mut self, at: u32, table_va: u32) -> &mut Self {
        self.put_u8(at, 0x55); // push ebp
        self.put_u8(at + 1, 0x8b); // mov ebp, esp
        self.put_u8(at + 2, 0xec);
        self.put_u8(at + 3, 0xb8); // mov eax, imm32
        self.put_u32(at + 4, table_va)
    }

    /// Single-unit initialisation table at `at`, its entry array right
    /// after the header, with `routine_va` as the only init routine.
    pub fn put_init_table(&mut self, at: u32, routine_va: u32) -> &mut Self {
        let info_va = self.load + at + 8;
        self.put_u32(at, 1);
        self.put_u32(at + 4, info_va);
        self.put_u32(at + 8, routine_va);
        self.put_u32(at + 12, 0)
    }

    /// Vftable at `at` with the given header length: self pointer, class
    /// name, instance size and parent filled, every other slot null.
    pub fn put_vftable(
        &mut self,
        at: u32,
        header_length: u32,
        name_at: u32,
        name: &str,
        parent_va: u32,
    ) -> &mut Self {
        let load = self.load;
        self.put_u32(at, load + at + header_length);
        self.put_u32(at + 32, load + name_at);
        self.put_u32(at + 36, 8);
        self.put_u32(at + 40, parent_va);
        self.put_pascal(name_at, name)
    }

    pub fn build(&self) -> SectionMap {
        SectionMap::new(self.name.clone(), self.load, self.bytes.clone())
    }
}
