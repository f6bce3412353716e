/// One element of a transfer sequence.
///
/// A transfer either writes bytes, or reads bytes into a buffer. A transfer
/// that does both can be constructed with [`Transfer::duplex`], but the SPI
/// master rejects it: reading the bytes clocked in while an opcode is clocked
/// out is expressed as a write followed by a read (see
/// [`SpiMaster::write_then_read`](crate::SpiMaster::write_then_read)).
#[derive(Debug)]
pub struct Transfer<'a> {
    write: Option<&'a [u8]>,
    read: Option<&'a mut [u8]>,
    len: usize,
}

impl<'a> Transfer<'a> {
    #[must_use]
    pub fn write(data: &'a [u8]) -> Self {
        Self {
            len: data.len(),
            write: Some(data),
            read: None,
        }
    }

    #[must_use]
    pub fn read(buf: &'a mut [u8]) -> Self {
        Self {
            len: buf.len(),
            write: None,
            read: Some(buf),
        }
    }

    /// A transfer that both writes and reads `min(write.len(), read.len())`
    /// bytes.
    #[must_use]
    pub fn duplex(write: &'a [u8], read: &'a mut [u8]) -> Self {
        let len = write.len().min(read.len());
        Self {
            len,
            write: Some(&write[..len]),
            read: Some(&mut read[..len]),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_write(&self) -> bool {
        self.write.is_some()
    }

    #[must_use]
    pub fn is_read(&self) -> bool {
        self.read.is_some()
    }

    pub(crate) fn write_data(&self) -> Option<&[u8]> {
        self.write
    }

    pub(crate) fn read_buf(&mut self) -> Option<&mut [u8]> {
        self.read.as_deref_mut()
    }
}
