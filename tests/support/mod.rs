#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use tempfile::TempDir;
use texrender::application::render::{FormulaRenderer, RenderPipelineConfig};

/// How the fake tools behave.
#[derive(Debug, Clone, Copy)]
pub struct FakeBehaviour {
    /// Page size in points reported and rendered by the fake rasterizer.
    pub page_pt: (u32, u32),
    /// Print `W x H pts` at 1 DPI.
    pub report_geometry: bool,
    /// Allow `-cropbox` renders.
    pub cropbox_works: bool,
    /// Install the fake image tool at all.
    pub image_tool: bool,
    /// Answer `identify` requests.
    pub identify_works: bool,
    /// Answer `convert` requests.
    pub convert_works: bool,
    /// Name single-page rasters `{base}.png` instead of `{base}-1.png`.
    pub raster_unsuffixed: bool,
    /// Exit 0 from the compiler without writing a PDF.
    pub compiler_skips_pdf: bool,
    /// Exit 0 from the rasterizer without writing a PNG.
    pub rasterizer_skips_png: bool,
}

impl Default for FakeBehaviour {
    fn default() -> Self {
        Self {
            page_pt: (100, 30),
            report_geometry: true,
            cropbox_works: true,
            image_tool: true,
            identify_works: true,
            convert_works: true,
            raster_unsuffixed: false,
            compiler_skips_pdf: false,
            rasterizer_skips_png: false,
        }
    }
}

/// A scratch directory plus shell-script stand-ins for the TeX toolchain.
pub struct FakeToolchain {
    pub root: TempDir,
    pub bin: PathBuf,
    pub scratch: PathBuf,
    pub log: PathBuf,
    pub behaviour: FakeBehaviour,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::with_behaviour(FakeBehaviour::default())
    }

    pub fn with_behaviour(behaviour: FakeBehaviour) -> Self {
        let root = TempDir::new().expect("temp dir");
        let bin = root.path().join("bin");
        let scratch = root.path().join("scratch");
        fs::create_dir_all(&bin).expect("bin dir");
        let log = root.path().join("calls.log");
        fs::write(&log, b"").expect("call log");

        let toolchain = Self {
            root,
            bin,
            scratch,
            log,
            behaviour,
        };
        toolchain.install();
        toolchain
    }

    pub fn compiler(&self) -> PathBuf {
        self.bin.join("xelatex")
    }

    pub fn rasterizer(&self) -> PathBuf {
        self.bin.join("pdftocairo")
    }

    pub fn image_tool(&self) -> PathBuf {
        self.bin.join("magick")
    }

    pub fn config(&self) -> RenderPipelineConfig {
        RenderPipelineConfig {
            compiler_path: self.compiler(),
            rasterizer_path: self.rasterizer(),
            image_tool_path: self.image_tool(),
            scratch_dir: self.scratch.clone(),
            tool_timeout: Duration::from_secs(20),
            strict_probe: false,
            main_font: "Latin Modern Roman".to_string(),
            cjk_font: None,
        }
    }

    pub fn renderer(&self) -> FormulaRenderer {
        FormulaRenderer::new(self.config()).expect("fake toolchain resolves")
    }

    /// Every recorded invocation, one `tool arg arg ...` line each.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .expect("read call log")
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn calls_to(&self, tool: &str) -> Vec<String> {
        let prefix = format!("{tool} ");
        self.calls()
            .into_iter()
            .filter(|line| line.starts_with(&prefix))
            .collect()
    }

    /// Sorted file names left in the scratch directory.
    pub fn scratch_entries(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.scratch) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn install(&self) {
        let log = self.log.display().to_string();
        let b = self.behaviour;

        write_script(
            &self.compiler(),
            &format!(
                r#"echo "xelatex $*" >> "{log}"
for last; do :; done
name="${{last%.tex}}"
if grep -q 'undefinedmacro' "$last"; then
  printf '%s\n' "This is XeTeX" "! Undefined control sequence." "l.12 x" "! Emergency stop." > "$name.log"
  echo "! Undefined control sequence."
  exit 1
fi
if [ "{skip_pdf}" != 1 ]; then
  printf '%%PDF-1.5 fake\n' > "$name.pdf"
fi
echo "Output written on $name.pdf (1 page)."
exit 0"#,
                skip_pdf = u8::from(b.compiler_skips_pdf),
            ),
        );

        write_script(
            &self.rasterizer(),
            &format!(
                r#"echo "pdftocairo $*" >> "{log}"
dpi=150
cropbox=0
doc=""
base=""
while [ $# -gt 0 ]; do
  case "$1" in
    -r) dpi="$2"; shift 2 ;;
    -cropbox) cropbox=1; shift ;;
    -*) shift ;;
    *) if [ -z "$doc" ]; then doc="$1"; else base="$1"; fi; shift ;;
  esac
done
[ -f "$doc" ] || {{ echo "I/O Error: Couldn't open file '$doc'" >&2; exit 1; }}
if [ "$cropbox" = 1 ] && [ "{cropbox_works}" != 1 ]; then
  echo "cropbox unsupported" >&2
  exit 99
fi
if [ "$dpi" = 1 ] && [ "{report_geometry}" = 1 ]; then
  echo "Page size: {w} x {h} pts" >&2
fi
[ "{skip_png}" = 1 ] && exit 0
out="$base-1.png"
[ "{unsuffixed}" = 1 ] && out="$base.png"
u32() {{
  for s in 24 16 8 0; do
    b=$(( ($1 >> s) & 255 ))
    printf "\\$(printf '%03o' "$b")"
  done
}}
w=$(( ({w} * dpi + 36) / 72 ))
h=$(( ({h} * dpi + 36) / 72 ))
[ "$w" -gt 0 ] || w=1
[ "$h" -gt 0 ] || h=1
{{
  printf '\211PNG\r\n\032\n'
  u32 13
  printf 'IHDR'
  u32 "$w"
  u32 "$h"
  printf '\010\006\000\000\000'
  u32 0
}} > "$out"
exit 0"#,
                w = b.page_pt.0,
                h = b.page_pt.1,
                cropbox_works = u8::from(b.cropbox_works),
                report_geometry = u8::from(b.report_geometry),
                skip_png = u8::from(b.rasterizer_skips_png),
                unsuffixed = u8::from(b.raster_unsuffixed),
            ),
        );

        if b.image_tool {
            write_script(
                &self.image_tool(),
                &format!(
                    r#"echo "magick $*" >> "{log}"
case "$1" in
  identify)
    [ "{identify_works}" = 1 ] || exit 1
    echo "{w} {h}"
    ;;
  convert)
    [ "{convert_works}" = 1 ] || {{ echo "convert: no decode delegate" >&2; exit 1; }}
    input="$2"
    for last; do :; done
    cp "$input" "$last"
    ;;
  *) exit 2 ;;
esac
exit 0"#,
                    w = b.page_pt.0,
                    h = b.page_pt.1,
                    identify_works = u8::from(b.identify_works),
                    convert_works = u8::from(b.convert_works),
                ),
            );
        }
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("set perms");
}

/// Pixel size of a PNG held in memory.
pub fn png_size(bytes: &[u8]) -> (usize, usize) {
    let size = imagesize::blob_size(bytes).expect("png header");
    (size.width, size.height)
}
