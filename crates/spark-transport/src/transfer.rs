//! 转移循环：文件区域与源通道向“某个写入函数”搬运字节的唯一实现。
//!
//! # 教案式说明
//! - **意图 (Why)**：通道的默认转移与帧写出器的校验型转移遵循同一套中转缓冲约定，
//!   只在“每块字节交给谁写”上不同；循环本身收敛在这里，写入动作以闭包注入；
//! - **契约 (What)**：
//!   - 写入函数返回 [`WriteStatus::Closed`] 时循环以 `BrokenPipe` 终止；
//!     调用方若需要其他错误语义，应在闭包内部先行映射；
//!   - 读写错误经 `E: From<io::Error>` 原样向上传播。

use std::io;

use bytes::{Buf, BytesMut};

use crate::{FileRegion, ReadStatus, SourceChannel, TransferStatus, WriteStatus};

/// 从 `position` 开始按块读取文件区域并交给 `write`，返回被接受的字节数。
///
/// 遇到部分接受、`WouldBlock` 或文件末尾即停止；读出但未被接受的尾部不计入返回值。
pub fn transfer_file_with<E, W>(
    file: &mut dyn FileRegion,
    position: u64,
    count: u64,
    chunk: usize,
    mut write: W,
) -> Result<u64, E>
where
    E: From<io::Error>,
    W: FnMut(&[u8]) -> Result<WriteStatus, E>,
{
    let mut scratch = vec![0u8; chunk_len(count, chunk.max(1))];
    let mut total = 0u64;
    while total < count {
        let want = chunk_len(count - total, scratch.len());
        let read = file.read_at(&mut scratch[..want], position + total)?;
        if read == 0 {
            break;
        }
        match write(&scratch[..read])? {
            WriteStatus::Written(written) => {
                total += written as u64;
                if written < read {
                    break;
                }
            }
            WriteStatus::WouldBlock => break,
            WriteStatus::Closed => return Err(peer_closed("file").into()),
        }
    }
    Ok(total)
}

/// 经由中转缓冲 `through` 从源通道搬运至多 `count` 字节。
///
/// 先写出 `through` 中遗留的字节；返回值统计本次从源读取的字节数，未被接受的部分留在 `through`。
/// `through` 容量为 0 时每次读取 `default_chunk` 字节。
pub fn transfer_source_with<E, W>(
    source: &mut dyn SourceChannel,
    count: u64,
    through: &mut BytesMut,
    default_chunk: usize,
    mut write: W,
) -> Result<TransferStatus, E>
where
    E: From<io::Error>,
    W: FnMut(&[u8]) -> Result<WriteStatus, E>,
{
    let chunk = match through.capacity() {
        0 => default_chunk.max(1),
        capacity => capacity,
    };
    let mut total = 0u64;
    loop {
        while through.has_remaining() {
            match write(through.chunk())? {
                WriteStatus::Written(0) | WriteStatus::WouldBlock => {
                    return Ok(progress_or(total, TransferStatus::WouldBlock));
                }
                WriteStatus::Written(written) => through.advance(written),
                WriteStatus::Closed => return Err(peer_closed("stream").into()),
            }
        }
        if total >= count {
            return Ok(TransferStatus::Transferred(total));
        }
        through.clear();
        through.resize(chunk_len(count - total, chunk), 0);
        match source.read(&mut through[..])? {
            ReadStatus::Read(read) if read > 0 => {
                through.truncate(read);
                total += read as u64;
            }
            ReadStatus::Read(_) | ReadStatus::WouldBlock => {
                through.clear();
                return Ok(progress_or(total, TransferStatus::WouldBlock));
            }
            ReadStatus::EndOfStream => {
                through.clear();
                return Ok(progress_or(total, TransferStatus::EndOfStream));
            }
        }
    }
}

fn peer_closed(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("sink closed by peer during {what} transfer"),
    )
}

fn chunk_len(remaining: u64, limit: usize) -> usize {
    usize::try_from(remaining).map_or(limit, |remaining| remaining.min(limit))
}

fn progress_or(total: u64, idle: TransferStatus) -> TransferStatus {
    if total > 0 {
        TransferStatus::Transferred(total)
    } else {
        idle
    }
}
