use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEntry, ReplyOpen, ReplyWrite, Request, FUSE_ROOT_ID,
};
use libc::{EINVAL, EISDIR, ENOENT};
use crate::fs::HistoryFile;
use tracing::{debug, error, info};

const TTL: Duration = Duration::from_secs(1);

/// 历史文件的固定 inode
pub const FILE_INO: u64 = 2;

pub const FS_NAME: &str = "basheternalhistory";
pub const FS_SUBTYPE: &str = "basheternalhistoryfs";

/// 把内核的 FUSE 调用映射到唯一的历史文件上
///
/// 挂载点目录只包含一个文件。文件对外宣告的权限位由配置决定（默认只读 0o444），
/// 但写调用照常处理：没有使用 `default_permissions`，内核不会按权限位拦截。
pub struct HistoryFs {
    file: Arc<HistoryFile>,
    runtime: Handle,
    file_name: String,
    file_mode: u16,
    uid: u32,
    gid: u32,
}

impl HistoryFs {
    pub fn new(file: Arc<HistoryFile>, runtime: Handle, file_name: String, file_mode: u16) -> Self {
        Self {
            file,
            runtime,
            file_name,
            file_mode,
            uid: rustix::process::getuid().as_raw(),
            gid: rustix::process::getgid().as_raw(),
        }
    }

    /// 在后台线程挂载；返回的 session 被 drop 时卸载
    pub fn mount(self, mount_point: &Path) -> std::io::Result<BackgroundSession> {
        info!("Mounting history filesystem at {:?}", mount_point);
        let options = [
            MountOption::FSName(FS_NAME.to_string()),
            MountOption::Subtype(FS_SUBTYPE.to_string()),
        ];
        fuser::spawn_mount2(self, mount_point, &options)
    }

    fn make_attr(&self, ino: u64, size: u64) -> FileAttr {
        let now = SystemTime::now();
        let (kind, perm, nlink) = if ino == FUSE_ROOT_ID {
            (FileType::Directory, 0o555, 2)
        } else {
            (FileType::RegularFile, self.file_mode, 1)
        };
        FileAttr {
            ino,
            size,
            blocks: (size + 511) / 512,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            flags: 0,
            blksize: 512,
        }
    }

    /// 只有根目录下的固定文件名能找到
    fn resolve(&self, parent: u64, name: &OsStr) -> Option<u64> {
        (parent == FUSE_ROOT_ID && name == OsStr::new(&self.file_name)).then_some(FILE_INO)
    }

    fn dir_entries(&self) -> [(u64, FileType, &str); 3] {
        [
            (FUSE_ROOT_ID, FileType::Directory, "."),
            (FUSE_ROOT_ID, FileType::Directory, ".."),
            (FILE_INO, FileType::RegularFile, self.file_name.as_str()),
        ]
    }

    fn file_attr(&self) -> FileAttr {
        let size = self.runtime.block_on(self.file.size());
        self.make_attr(FILE_INO, size)
    }
}

impl Filesystem for HistoryFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.resolve(parent, name) {
            Some(ino) => {
                let attr = self.file_attr();
                debug!("lookup: {:?} -> ino={}, size={}", name, ino, attr.size);
                reply.entry(&TTL, &attr, 0);
            }
            None => {
                debug!("lookup: parent={}, name={:?} not found", parent, name);
                reply.error(ENOENT);
            }
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);
        match ino {
            FUSE_ROOT_ID => reply.attr(&TTL, &self.make_attr(FUSE_ROOT_ID, 0)),
            FILE_INO => reply.attr(&TTL, &self.file_attr()),
            _ => reply.error(ENOENT),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("open: ino={}", ino);
        match ino {
            FILE_INO => reply.opened(0, 0),
            FUSE_ROOT_ID => reply.error(EISDIR),
            _ => reply.error(ENOENT),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read: ino={}, offset={}, size={}", ino, offset, size);
        if ino != FILE_INO {
            reply.error(if ino == FUSE_ROOT_ID { EISDIR } else { ENOENT });
            return;
        }
        let offset = u64::try_from(offset).unwrap_or(0);
        let data = self.runtime.block_on(self.file.read(offset, size as usize));
        reply.data(&data);
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write: ino={}, offset={}, size={}", ino, offset, data.len());
        if ino != FILE_INO {
            reply.error(if ino == FUSE_ROOT_ID { EISDIR } else { ENOENT });
            return;
        }
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(EINVAL);
            return;
        };
        match self.runtime.block_on(self.file.write(offset, data)) {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                error!("write error at offset={}: {}", offset, e);
                reply.error(EINVAL);
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir: ino={}, offset={}", ino, offset);
        if ino != FUSE_ROOT_ID {
            reply.error(ENOENT);
            return;
        }
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in self.dir_entries().into_iter().enumerate().skip(skip) {
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }
}
