use std::collections::HashMap;

use anyhow::bail;

/// Trait for byte-addressed backing stores behind a memory endpoint.
pub trait HasMemory {
    fn read_impl(&self, addr: u64, n: usize) -> Result<Vec<u8>, anyhow::Error>;
    fn read(&self, addr: u64, n: usize) -> Result<Vec<u8>, anyhow::Error> {
        if n == 0 {
            bail!("zero-sized memory read @ {:#x}", addr);
        }
        if addr.checked_add(n as u64).is_none() {
            bail!("memory read of size {} @ {:#x} wraps the address space", n, addr);
        }
        self.read_impl(addr, n)
    }

    fn write_impl(&mut self, addr: u64, data: &[u8]) -> Result<(), anyhow::Error>;
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), anyhow::Error> {
        if data.is_empty() {
            bail!("zero-sized memory write @ {:#x}", addr);
        }
        if addr.checked_add(data.len() as u64).is_none() {
            bail!(
                "memory write of size {} @ {:#x} wraps the address space",
                data.len(),
                addr
            );
        }
        self.write_impl(addr, data)
    }
}

pub const PAGE_SIZE: usize = 4096;

// a sparse memory that reads anything never written as 0
#[derive(Debug, Clone, Default)]
pub struct SparseMemory {
    pages: HashMap<u64, Box<[u8; PAGE_SIZE]>>,
}

impl SparseMemory {
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn reset(&mut self) {
        self.pages.clear();
    }
}

fn split(addr: u64) -> (u64, usize) {
    (addr / PAGE_SIZE as u64, (addr % PAGE_SIZE as u64) as usize)
}

impl HasMemory for SparseMemory {
    fn read_impl(&self, addr: u64, n: usize) -> Result<Vec<u8>, anyhow::Error> {
        let mut out = Vec::with_capacity(n);
        let mut cursor = addr;
        while out.len() < n {
            let (page, offset) = split(cursor);
            let chunk = (PAGE_SIZE - offset).min(n - out.len());
            match self.pages.get(&page) {
                Some(bytes) => out.extend_from_slice(&bytes[offset..offset + chunk]),
                None => out.resize(out.len() + chunk, 0),
            }
            cursor += chunk as u64;
        }
        Ok(out)
    }

    fn write_impl(&mut self, addr: u64, data: &[u8]) -> Result<(), anyhow::Error> {
        let mut cursor = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let (page, offset) = split(cursor);
            let chunk = (PAGE_SIZE - offset).min(rest.len());
            let bytes = self
                .pages
                .entry(page)
                .or_insert_with(|| Box::new([0; PAGE_SIZE]));
            bytes[offset..offset + chunk].copy_from_slice(&rest[..chunk]);
            rest = &rest[chunk..];
            cursor += chunk as u64;
        }
        Ok(())
    }
}
