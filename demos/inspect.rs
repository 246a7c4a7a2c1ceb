use std::env;
use std::fs;
use std::path::PathBuf;

use nxcarve::Result;
use nxcarve::extract::{ExtractMode, export_image, export_regions};
use nxcarve::formats::Container;
use nxcarve::formats::kip::KipHeader;
use nxcarve::formats::npdm::Npdm;
use nxcarve::formats::ticket::Ticket;
use nxcarve::region::{FileRegion, StreamProducer, read_exact_or_truncated};

fn main() -> Result<()> {
    let mut args = env::args_os().skip(1);
    let path = PathBuf::from(args.next().unwrap_or_else(|| "main.npdm".into()));
    let out = PathBuf::from(args.next().unwrap_or_else(|| "out".into()));

    let size = fs::metadata(&path)?.len() as usize;
    let region = FileRegion::new(&path, 0);
    let magic = read_exact_or_truncated(&mut region.open()?, 4)?;

    match magic.as_slice() {
        b"META" => {
            let npdm = Npdm::read_from_stream(&mut region.open()?)?;
            println!("title:      {}", npdm.title_name);
            println!("program id: {:016X}", npdm.aci.program_id);
            println!("64-bit:     {}", npdm.is_64bit());
            for service in &npdm.aci.service_access.entries {
                let role = if service.is_server { " (server)" } else { "" };
                println!("service:    {}{role}", service.name);
            }
            for path in export_regions(&region, &npdm, &out)? {
                println!("wrote {}", path.display());
            }
        }
        b"KIP1" => {
            let kip = KipHeader::open(&region, KipHeader::HEADER_SIZE)?;
            println!("name:       {}", kip.name);
            println!("program id: {:016X}", kip.program_id);
            // The header name is untrusted; name the output after the program ID.
            let name = format!("{:016X}.bin", kip.program_id);
            for path in export_image(&region, &kip, &out, &name, ExtractMode::Image)? {
                println!("wrote {}", path.display());
            }
        }
        _ => {
            let ticket = Ticket::open(&region, size)?;
            println!("rights id:  {:02X?}", ticket.rights_id);
            println!("key type:   {:?}", ticket.title_key_type);
            if let Some(key) = ticket.title_key() {
                println!("title key:  {key:02X?}");
            }
        }
    }

    Ok(())
}
