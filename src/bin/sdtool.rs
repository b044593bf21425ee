use log::LevelFilter;
use log::{debug, error, info};
use sdblk::{
    format, render_blocks, BlockTransfer, Completion, Config, CopyOutcome, ErrorKind, FillMode,
    RegisterId, RenderMode, StatusCode, Storage, StorageSession, TransferOutcome,
    DEFAULT_BLOCK_SIZE,
};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;

/// Status reported for host I/O failures on the image file.
const IO_ERROR: StatusCode = StatusCode(-5);
/// Status reported for blocks past the end of the image.
const OUT_OF_RANGE: StatusCode = StatusCode(-34);

const CID_TEMPLATE: [u8; 16] = [
    0x00, b'S', b'D', b'I', b'M', b'A', b'G', b'E', 0x10, 0x00, 0x00, 0x00, 0x01, 0x01, 0x5a, 0x01,
];

/// CSD V2 with C_SIZE cleared; filled in from the image size.
const CSD_V2_TEMPLATE: [u8; 16] = [
    0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x00, 0x00, 0x7F, 0x80, 0x0A, 0x40, 0x00, 0x01,
];

/// Blocks per unit of the CSD V2 C_SIZE field.
const CSD_V2_UNIT_BLOCKS: u64 = 1024;

fn with_crc(mut raw: [u8; 16]) -> [u8; 16] {
    raw[15] = (sdblk::crc7(&raw[..15]) << 1) | 1;
    raw
}

fn synthesize_csd(num_blocks: u64) -> [u8; 16] {
    let c_size = (num_blocks / CSD_V2_UNIT_BLOCKS).saturating_sub(1) & 0x3F_FFFF;
    let mut raw = CSD_V2_TEMPLATE;
    raw[7] = (c_size >> 16) as u8;
    raw[8] = (c_size >> 8) as u8;
    raw[9] = c_size as u8;
    with_crc(raw)
}

/// Card backed by a disk image, one block per `block_size` bytes of the file.
struct FileCard {
    file: File,
    len: u64,
    block_size: usize,
    cid: [u8; 16],
    csd: [u8; 16],
    sds: [u8; 64],
}

impl FileCard {
    fn open(opt: &Opt) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&opt.image)?;
        let len = file.metadata()?.len();
        let block_size = DEFAULT_BLOCK_SIZE;
        let register = |raw: &Option<Hex>, default: &[u8]| -> io::Result<Vec<u8>> {
            match raw {
                Some(Hex(bytes)) if bytes.len() != default.len() => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("expected {} register bytes, got {}", default.len(), bytes.len()),
                )),
                Some(Hex(bytes)) => Ok(bytes.clone()),
                None => Ok(default.to_vec()),
            }
        };
        let mut card = FileCard {
            file,
            len,
            block_size,
            cid: [0u8; 16],
            csd: [0u8; 16],
            sds: [0u8; 64],
        };
        card.cid
            .copy_from_slice(&register(&opt.cid, &with_crc(CID_TEMPLATE))?);
        card.csd.copy_from_slice(&register(
            &opt.csd,
            &synthesize_csd(len / block_size as u64),
        )?);
        card.sds.copy_from_slice(&register(&opt.sds, &[0u8; 64])?);
        debug!("opened {:?}: {} bytes", opt.image, len);
        Ok(card)
    }

    /// Blocks of `[lba, lba + count)` that lie inside the image.
    fn in_range(&self, lba: u32, count: u32) -> u32 {
        let num_blocks = self.len / self.block_size as u64;
        let available = num_blocks.saturating_sub(u64::from(lba));
        available.min(u64::from(count)) as u32
    }

    fn seek_block(&mut self, lba: u32) -> io::Result<()> {
        self.file
            .seek(SeekFrom::Start(u64::from(lba) * self.block_size as u64))?;
        Ok(())
    }

    fn finish(count: u32, done: u32, res: io::Result<()>) -> Completion {
        match res {
            Err(err) => {
                error!("image i/o failed: {}", err);
                Completion::failed(0, IO_ERROR)
            }
            Ok(()) if done < count => Completion::failed(done, OUT_OF_RANGE),
            Ok(()) => Completion::ok(count),
        }
    }
}

impl Storage for FileCard {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn init(&mut self) -> StatusCode {
        if self.len < self.block_size as u64 {
            return IO_ERROR;
        }
        StatusCode::OK
    }

    fn read_blocks(
        &mut self,
        lba: u32,
        data: &mut [u8],
        block_size: usize,
        count: u32,
    ) -> Completion {
        let done = self.in_range(lba, count);
        let len = done as usize * block_size;
        let res = if done > 0 {
            self.seek_block(lba)
                .and_then(|_| self.file.read_exact(&mut data[..len]))
        } else {
            Ok(())
        };
        FileCard::finish(count, done, res)
    }

    fn write_blocks(&mut self, lba: u32, data: &[u8], block_size: usize, count: u32) -> Completion {
        let done = self.in_range(lba, count);
        let len = done as usize * block_size;
        let res = if done > 0 {
            self.seek_block(lba)
                .and_then(|_| self.file.write_all(&data[..len]))
                .and_then(|_| self.file.flush())
        } else {
            Ok(())
        };
        FileCard::finish(count, done, res)
    }

    fn read_register(&mut self, id: RegisterId, raw: &mut [u8]) -> StatusCode {
        let src: &[u8] = match id {
            RegisterId::Cid => &self.cid,
            RegisterId::Csd => &self.csd,
            RegisterId::SdStatus => &self.sds,
        };
        if raw.len() != src.len() {
            return IO_ERROR;
        }
        raw.copy_from_slice(src);
        StatusCode::OK
    }

    fn capacity_bytes(&self) -> u64 {
        self.len
    }

    fn sector_count(&self) -> u32 {
        (self.len / self.block_size as u64).min(u64::from(u32::MAX)) as u32
    }
}

/// Register image given on the command line as hex digits, optionally `:` separated.
struct Hex(Vec<u8>);

impl FromStr for Hex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s).map(Hex)
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<char> = s
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {:?}", s));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).map_err(|err| format!("{:?}: {}", byte, err))
        })
        .collect()
}

#[derive(StructOpt)]
enum Command {
    /// Print the card identification register.
    Cid,
    /// Print the card specific data register.
    Csd,
    /// Print the SD status register.
    Sds,
    /// Print the card size in GiB and GB.
    Size,
    /// Print the number of blocks on the card.
    Sectors,
    /// Read `count` blocks starting at `addr`.
    Read {
        addr: u32,
        count: u32,
        /// Print bytes as characters instead of hex.
        #[structopt(short = "c")]
        chars: bool,
    },
    /// Write one block at `addr` from `data`, zero padded.
    Write {
        addr: u32,
        data: String,
        /// Repeat `data` to fill the block instead of zero padding.
        #[structopt(short = "r")]
        repeat: bool,
    },
    /// Copy block `src` to block `dst`.
    Copy { src: u32, dst: u32 },
}

#[derive(StructOpt)]
struct Opt {
    /// Disk image standing in for the card.
    #[structopt(parse(from_os_str))]
    image: PathBuf,
    /// Staging buffer size in blocks.
    #[structopt(long, default_value = "4")]
    max_blocks: usize,
    /// CID register image as hex.
    #[structopt(long)]
    cid: Option<Hex>,
    /// CSD register image as hex.
    #[structopt(long)]
    csd: Option<Hex>,
    /// SD status register image as hex.
    #[structopt(long)]
    sds: Option<Hex>,
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
    #[structopt(subcommand)]
    cmd: Command,
}

enum ToolError {
    Io(io::Error),
    Card(ErrorKind),
}

impl From<io::Error> for ToolError {
    fn from(err: io::Error) -> Self {
        ToolError::Io(err)
    }
}

impl From<ErrorKind> for ToolError {
    fn from(err: ErrorKind) -> Self {
        ToolError::Card(err)
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Io(err) => write!(f, "{}", err),
            ToolError::Card(err) => write!(f, "{}", err),
        }
    }
}

fn report(outcome: TransferOutcome, count: u32, what: &str) -> Result<(), ToolError> {
    if let TransferOutcome::Failed {
        status,
        blocks_completed,
    } = outcome
    {
        eprintln!(
            "{} error {} (block {}/{})",
            what, status.0, blocks_completed, count
        );
    }
    Ok(outcome.into_result()?)
}

fn run(opt: &Opt) -> Result<(), ToolError> {
    let config = Config {
        max_blocks_in_buffer: opt.max_blocks,
        ..Config::default()
    };
    let mut session = StorageSession::attach(FileCard::open(opt)?)?;
    session.init()?;
    let block_size = session.block_size();
    let mut staging = vec![0u8; config.staging_len(block_size)?];
    let mut engine = BlockTransfer::new(&mut staging);

    match &opt.cmd {
        Command::Cid => {
            if let Some(cid) = session.identification() {
                println!("{}", format(cid));
            }
        }
        Command::Csd => {
            if let Some(csd) = session.geometry() {
                println!("{}", format(csd));
            }
        }
        Command::Sds => {
            let sds = session.refresh_status()?;
            println!("{}", format(&sds));
        }
        Command::Size => {
            let bytes = session.capacity_bytes()?;
            println!("Card size: {} bytes", bytes);
            println!("{}", session.capacity_breakdown()?);
        }
        Command::Sectors => {
            println!("{} sectors", session.sector_count()?);
        }
        Command::Read { addr, count, chars } => {
            let mode = if *chars {
                RenderMode::Chars
            } else {
                RenderMode::Hex
            };
            let mut rendered = Ok(());
            let outcome = engine.read(&mut session, *addr, *count, |first, bytes| {
                if rendered.is_err() {
                    return;
                }
                rendered = render_blocks(bytes, first, block_size, mode)
                    .and_then(|lines| lines.with_bytes_per_line(config.bytes_per_line))
                    .map(|lines| lines.for_each(|line| println!("{}", line)));
            });
            rendered?;
            report(outcome?, *count, "read")?;
        }
        Command::Write { addr, data, repeat } => {
            let fill = if *repeat {
                FillMode::Repeat
            } else {
                FillMode::ZeroPad
            };
            let outcome = engine.write(&mut session, *addr, data.as_bytes(), fill)?;
            report(outcome, 1, "write")?;
        }
        Command::Copy { src, dst } => match engine.copy(&mut session, *src, *dst)? {
            CopyOutcome::Copied => {}
            CopyOutcome::SourceFailed(status) => {
                eprintln!("read error {} (block {})", status.0, src);
                return Err(ErrorKind::Device(status).into());
            }
            CopyOutcome::DestinationFailed(status) => {
                eprintln!("write error {} (block {})", status.0, dst);
                return Err(ErrorKind::Device(status).into());
            }
        },
    }

    info!("done");
    Ok(())
}

fn main() {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::builder()
        .format_timestamp_nanos()
        .filter_level(level)
        .init();

    if let Err(err) = run(&opt) {
        eprintln!("[FAILED] {}", err);
        std::process::exit(1);
    }
}
