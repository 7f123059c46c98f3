use bytes::BytesMut;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// Pool of datagram buffers for the send path: a merged datagram is assembled in a pooled buffer
///  and the buffer is returned after the socket send.
pub struct BufferPool {
    buf_size: usize,
    max_pool_size: usize,
    buffers: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_pool_size: usize) -> Self {
        BufferPool {
            buf_size,
            max_pool_size,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn get_from_pool(&self) -> BytesMut {
        {
            let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(buffer) = buffers.pop() {
                trace!("returning buffer from pool");
                return buffer;
            }
        }

        debug!("no buffer in pool: creating new buffer");
        BytesMut::with_capacity(self.buf_size)
    }

    pub fn return_to_pool(&self, mut buffer: BytesMut) {
        if buffer.capacity() < self.buf_size {
            debug!("returned buffer has a capacity of {} bytes instead of {} - discarding", buffer.capacity(), self.buf_size);
            return;
        }

        buffer.clear();

        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_pool_size {
            trace!("returning buffer to pool");
            buffers.push(buffer);
        }
        else {
            debug!("pool is full: discarding returned buffer");
        }
    }

    #[cfg(test)]
    fn num_pooled(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use super::*;

    #[test]
    fn test_clear() {
        let pool = BufferPool::new(10, 10);

        let mut buf = BytesMut::with_capacity(10);
        buf.put_u8(1);

        pool.return_to_pool(buf);

        assert!(pool.get_from_pool().is_empty());
    }

    #[test]
    fn test_reuse() {
        let pool = BufferPool::new(10, 10);
        let buf = pool.get_from_pool();
        assert!(buf.capacity() >= 10);
        pool.return_to_pool(buf);
        assert_eq!(pool.num_pooled(), 1);

        let _buf = pool.get_from_pool();
        assert_eq!(pool.num_pooled(), 0);
    }

    #[test]
    fn test_pool_size_is_bounded() {
        let pool = BufferPool::new(10, 2);
        for _ in 0..5 {
            pool.return_to_pool(BytesMut::with_capacity(10));
        }
        assert_eq!(pool.num_pooled(), 2);
    }

    #[test]
    fn test_discard_undersized() {
        let pool = BufferPool::new(10, 2);
        let mut buf = BytesMut::with_capacity(10);
        buf.put_slice(b"0123456789");
        let _ = buf.split_to(5);
        pool.return_to_pool(buf);
        assert_eq!(pool.num_pooled(), 0);
    }
}
