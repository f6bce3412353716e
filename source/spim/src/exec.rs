//! Loading one glob into the SPI master's register image, and unloading the
//! bytes it received.
use mt3620::spi::{DmaConfig, Smbcr, Smmr, BUFFER_SIZE_HALF_DUPLEX, FULL_DUPLEX_RX_OFFSET};

use crate::{
    glob::{Glob, GlobKind, GlobPolicy},
    Error, Port, Transfer,
};

/// Byte clocked out while reading, and after the last payload byte.
const IDLE: u8 = 0xFF;

/// Programs `glob` into `config` and starts it, either by DMA or by copying
/// the image into the registers directly.
pub(crate) fn launch<P: Port>(
    port: &mut P,
    config: &mut DmaConfig,
    dma: bool,
    glob: &Glob,
    transfers: &[Transfer<'_>],
    policy: GlobPolicy,
) -> Result<(), Error> {
    program(config, glob, transfers, policy)?;
    tracing::trace!(?glob, dma, soar = config.soar, "launching glob");
    if dma {
        port.start_dma(config);
    } else {
        port.load_and_start(config);
    }
    Ok(())
}

/// Writes the mode, bit counts, opcode and outgoing data for `glob`.
pub(crate) fn program(
    config: &mut DmaConfig,
    glob: &Glob,
    transfers: &[Transfer<'_>],
    policy: GlobPolicy,
) -> Result<(), Error> {
    let payload_bits = (glob.payload_len() * 8) as u32;
    let (duplex, mosi_bits, miso_bits, cmd_bits) = match glob.kind() {
        GlobKind::Write if policy.half_duplex_writes => (false, payload_bits, 0, 0),
        GlobKind::Write => return Err(Error::Unsupported),
        GlobKind::Read => (false, 0, payload_bits, 0),
        GlobKind::FullDuplex => (
            true,
            payload_bits,
            payload_bits,
            (glob.opcode_len() * 8) as u32,
        ),
    };
    config.smmr.set(Smmr::BOTH_DIRECTIONAL_DATA_MODE, duplex);
    config.smbcr = Smbcr::new()
        .with(Smbcr::MOSI_BIT_CNT, mosi_bits)
        .with(Smbcr::MISO_BIT_CNT, miso_bits)
        .with(Smbcr::CMD_BIT_CNT, cmd_bits);

    let (first, rest) = transfers
        .get(glob.transfers())
        .and_then(<[_]>::split_first)
        .ok_or(Error::InvalidParameter)?;

    // The opcode goes out MSB first, so the first byte ends up in the
    // highest byte that is shifted out. Unused high bytes stay 0xFF.
    let opcode_len = glob.opcode_len();
    let mut pos = first.len() - opcode_len;
    match first.write_data() {
        Some(data) => {
            config.soar = data[..opcode_len]
                .iter()
                .fold(u32::MAX, |soar, &byte| soar << 8 | u32::from(byte));
            config.sdor[..pos].copy_from_slice(&data[opcode_len..]);
        }
        None => {
            config.soar = u32::MAX;
            config.sdor[..pos].fill(IDLE);
        }
    }

    for transfer in rest {
        let out = &mut config.sdor[pos..pos + transfer.len()];
        match transfer.write_data() {
            Some(data) => out.copy_from_slice(data),
            None => out.fill(IDLE),
        }
        pos += transfer.len();
    }

    // MOSI holds the level of the bit after the payload, so make sure that
    // is high. A full 32-byte read has no room left; nothing is clocked out
    // in that case anyway.
    if let Some(idle) = config.sdor.get_mut(pos) {
        *idle = IDLE;
    }

    Ok(())
}

/// Copies the bytes `glob` received from `sdir` into its read transfers.
pub(crate) fn collect(
    sdir: &[u8; BUFFER_SIZE_HALF_DUPLEX],
    glob: &Glob,
    transfers: &mut [Transfer<'_>],
) {
    let mut offset = match glob.kind() {
        GlobKind::FullDuplex => FULL_DUPLEX_RX_OFFSET,
        GlobKind::Read | GlobKind::Write => 0,
    };
    let Some(transfers) = transfers.get_mut(glob.transfers()) else {
        return;
    };

    for (i, transfer) in transfers.iter_mut().enumerate() {
        let len = transfer.len();
        if let (Some(buf), Some(received)) = (transfer.read_buf(), sdir.get(offset..offset + len)) {
            buf.copy_from_slice(received);
        }

        offset += len;
        if i == 0 {
            // the opcode is shifted out of `SOAR`, not `SDOR`.
            offset -= glob.opcode_len();
        }
    }
}
