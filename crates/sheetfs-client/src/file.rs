//! An opened sheet: cell reads and writes, whole-sheet scans.
//!
//! Cell operations chain a master metadata round-trip with a datanode data
//! round-trip. The master sometimes hands out a version a concurrent writer
//! has not landed on the datanode yet; the datanode answers `WrongVersion`
//! and the call spins against the same descriptor until it converges or the
//! caller's cancellation token fires.

use sheetfs_proto::{
    ReadCellRequest, ReadChunkRequest, ReadSheetRequest, Status, WriteCellRequest,
    WriteChunkRequest, BYTES_PER_CHUNK, DEFAULT_PADDING,
};
use tracing::debug;

use crate::assemble;
use crate::cancel::CancelToken;
use crate::client::Client;
use crate::error::{ClientError, ClientResult};

/// Handle to an opened sheet. Clones share the fd, so concurrent cell
/// operations from several tasks behave like Unix dup'd descriptors.
#[derive(Clone)]
pub struct File {
    fd: u64,
    client: Client,
}

enum ChunkPayload {
    Cells(Vec<u8>),
    Meta(Vec<u8>),
    Missing,
}

async fn fetch_chunk(
    client: Client,
    chunk: sheetfs_proto::Chunk,
    cancel: CancelToken,
    abort: CancelToken,
) -> ClientResult<ChunkPayload> {
    loop {
        if cancel.is_cancelled() || abort.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let reply = match client
            .read_chunk(
                &chunk.datanode,
                ReadChunkRequest {
                    id: chunk.id,
                    offset: 0,
                    size: BYTES_PER_CHUNK,
                    version: chunk.version,
                },
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                abort.cancel();
                return Err(e);
            }
        };
        match reply.status {
            Status::Ok => {
                return Ok(if chunk.holds_meta {
                    ChunkPayload::Meta(reply.data)
                } else {
                    ChunkPayload::Cells(reply.data)
                })
            }
            Status::WrongVersion => {
                tokio::task::yield_now().await;
            }
            // A sheet whose meta cell was allocated but never written has
            // no meta chunk file yet.
            Status::NotFound if chunk.holds_meta => return Ok(ChunkPayload::Missing),
            status => {
                abort.cancel();
                return Err(ClientError::UnexpectedStatus(status));
            }
        }
    }
}

impl File {
    pub(crate) fn new(fd: u64, client: Client) -> Self {
        Self { fd, client }
    }

    /// The fd the master allocated for this handle.
    pub fn fd(&self) -> u64 {
        self.fd
    }

    /// Read the cell at `(row, col)`. Returns the full cell slot; the
    /// remainder past the written bytes carries the writer's padding.
    pub async fn read_at(
        &self,
        row: u32,
        col: u32,
        cancel: &CancelToken,
    ) -> ClientResult<Vec<u8>> {
        let reply = self
            .client
            .master()
            .await
            .read_cell(ReadCellRequest {
                fd: self.fd,
                row,
                col,
            })
            .await?;
        let cell = match reply.status {
            Status::Ok => reply.cell.ok_or(ClientError::UnexpectedStatus(Status::Ok))?,
            Status::Invalid => return Err(ClientError::CellNotFound),
            status => return Err(ClientError::UnexpectedStatus(status)),
        };
        let req = ReadChunkRequest {
            id: cell.chunk.id,
            offset: cell.offset,
            size: cell.size,
            version: cell.chunk.version,
        };
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            let reply = self
                .client
                .read_chunk(&cell.chunk.datanode, req.clone())
                .await?;
            match reply.status {
                Status::Ok => return Ok(reply.data),
                Status::WrongVersion => {
                    debug!(chunk = cell.chunk.id, "read raced a writer, retrying");
                    tokio::task::yield_now().await;
                }
                Status::NotFound => return Err(ClientError::NotFound),
                status => return Err(ClientError::UnexpectedStatus(status)),
            }
        }
    }

    /// Write `data` into the cell at `(row, col)`, creating it if needed.
    /// Returns the number of bytes written. `padding` fills the rest of the
    /// cell's slot and defaults to a space.
    pub async fn write_at(
        &self,
        data: &[u8],
        row: u32,
        col: u32,
        padding: Option<u8>,
        cancel: &CancelToken,
    ) -> ClientResult<u64> {
        let reply = self
            .client
            .master()
            .await
            .write_cell(WriteCellRequest {
                fd: self.fd,
                row,
                col,
            })
            .await?;
        let cell = match reply.status {
            Status::Ok => reply.cell.ok_or(ClientError::UnexpectedStatus(Status::Ok))?,
            status => return Err(ClientError::UnexpectedStatus(status)),
        };
        let req = WriteChunkRequest {
            id: cell.chunk.id,
            offset: cell.offset,
            size: data.len() as u64,
            version: cell.chunk.version,
            padding: padding.unwrap_or(DEFAULT_PADDING),
            data: data.to_vec(),
        };
        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            let reply = self
                .client
                .write_chunk(&cell.chunk.datanode, req.clone())
                .await?;
            match reply.status {
                Status::Ok => return Ok(data.len() as u64),
                Status::WrongVersion => {
                    debug!(chunk = cell.chunk.id, "write raced a writer, retrying");
                    tokio::task::yield_now().await;
                }
                Status::NotFound => return Err(ClientError::NotFound),
                status => return Err(ClientError::UnexpectedStatus(status)),
            }
        }
    }

    /// Read the whole sheet and assemble the document envelope.
    ///
    /// Issues one read per chunk concurrently. The first fatal error
    /// cancels the remaining readers; version races spin as usual.
    pub async fn read(&self, cancel: &CancelToken) -> ClientResult<Vec<u8>> {
        let reply = self
            .client
            .master()
            .await
            .read_sheet(ReadSheetRequest { fd: self.fd })
            .await?;
        match reply.status {
            Status::Ok => {}
            Status::NotFound => return Err(ClientError::NotFound),
            status => return Err(ClientError::UnexpectedStatus(status)),
        }

        let abort = CancelToken::new();
        let mut workers = Vec::with_capacity(reply.chunks.len());
        for chunk in reply.chunks {
            workers.push(tokio::spawn(fetch_chunk(
                self.client.clone(),
                chunk,
                cancel.clone(),
                abort.clone(),
            )));
        }

        let mut cells: Vec<Vec<u8>> = Vec::new();
        let mut meta: Vec<u8> = Vec::new();
        let mut first_err: Option<ClientError> = None;
        let note_err = |e: ClientError, first_err: &mut Option<ClientError>| {
            // A sibling cancelled by a real failure must not mask it.
            match first_err {
                None => *first_err = Some(e),
                Some(ClientError::Cancelled) if !matches!(e, ClientError::Cancelled) => {
                    *first_err = Some(e)
                }
                Some(_) => {}
            }
        };
        for worker in workers {
            match worker.await {
                Ok(Ok(ChunkPayload::Cells(payload))) => {
                    cells.extend(assemble::split_cells(&payload, DEFAULT_PADDING));
                }
                Ok(Ok(ChunkPayload::Meta(payload))) => {
                    meta = assemble::trim_padding(&payload, DEFAULT_PADDING).to_vec();
                }
                Ok(Ok(ChunkPayload::Missing)) => {}
                Ok(Err(e)) => note_err(e, &mut first_err),
                Err(join) => note_err(ClientError::Transport(join.to_string()), &mut first_err),
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(assemble::assemble(&cells, &meta))
    }
}
