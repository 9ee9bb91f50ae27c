//! Tesseract OCR via the command-line binary
//!
//! Images are written to a temporary PNG and passed to `tesseract`, which
//! writes either plain text or a TSV table with per-word confidence next to
//! it. A run past its deadline is killed.

use image::DynamicImage;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, warn};

use super::recognizer::{Recognition, RecognizeError, RecognizeOptions, TextRecognizer};

/// Plain text or TSV word output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TesseractOutput {
    Text,
    Tsv,
}

impl TesseractOutput {
    fn extension(&self) -> &'static str {
        match self {
            TesseractOutput::Text => "txt",
            TesseractOutput::Tsv => "tsv",
        }
    }
}

/// Poll interval while waiting on the child process
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct TesseractRecognizer {
    command: String,
    language: String,
    output: TesseractOutput,
    timeout: Option<Duration>,
}

impl TesseractRecognizer {
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
            output: TesseractOutput::Text,
            timeout: None,
        }
    }

    /// Kill the process when a single run exceeds `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Emit per-word confidence via TSV output
    pub fn with_tsv(mut self) -> Self {
        self.output = TesseractOutput::Tsv;
        self
    }

    /// Run on `image_path`, writing `<output_base>.txt|.tsv`; returns that file's contents
    fn run(
        &self,
        image_path: &Path,
        output_base: &Path,
        options: &RecognizeOptions,
    ) -> Result<String, RecognizeError> {
        let stderr_path = output_base.with_extension("log");
        let mut command = Command::new(&self.command);
        command
            .arg(image_path)
            .arg(output_base)
            .args(["-l", &self.language])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&stderr_path)?);
        if let Some(psm) = options.page_segmentation {
            command.args(["--psm", &psm.to_string()]);
        }
        if self.output == TesseractOutput::Tsv {
            command.arg("tsv");
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecognizeError::BackendNotAvailable(format!(
                    "{} not found (install tesseract-ocr)",
                    self.command
                )))
            }
            Err(e) => return Err(RecognizeError::Io(e)),
        };

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if self.timeout.is_some_and(|limit| started.elapsed() >= limit) {
                warn!("{} exceeded {:?}, killing it", self.command, self.timeout);
                child.kill().ok();
                child.wait().ok();
                return Err(RecognizeError::Failed(format!(
                    "{} timed out after {:?}",
                    self.command,
                    started.elapsed()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(RecognizeError::Failed(format!("tesseract failed: {}", stderr.trim())));
        }

        let output_path = output_base.with_extension(self.output.extension());
        Ok(std::fs::read_to_string(output_path)?)
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("tesseract", "eng")
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(
        &self,
        image: &DynamicImage,
        options: &RecognizeOptions,
    ) -> Result<Recognition, RecognizeError> {
        let temp_dir = TempDir::new()?;
        let image_path = temp_dir.path().join("input.png");
        image
            .save(&image_path)
            .map_err(|e| RecognizeError::Image(e.to_string()))?;

        let text = self.run(&image_path, &temp_dir.path().join("output"), options)?;
        debug!(
            "tesseract psm={:?} returned {} bytes",
            options.page_segmentation,
            text.len()
        );

        Ok(match self.output {
            TesseractOutput::Text => Recognition::plain(text.trim()),
            TesseractOutput::Tsv => parse_tsv(&text),
        })
    }
}

/// Word rows (level 5) with a non-negative confidence, scaled to 0-1
fn parse_tsv(tsv: &str) -> Recognition {
    let words = tsv
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                return None;
            }
            let conf: f32 = cols[10].trim().parse().ok()?;
            let text = cols[11].trim();
            if conf < 0.0 || text.is_empty() {
                return None;
            }
            Some((text.to_string(), conf / 100.0))
        });
    Recognition::scored(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t100\t40\t-1\t
4\t1\t1\t1\t1\t0\t2\t2\t90\t20\t-1\t
5\t1\t1\t1\t1\t1\t2\t2\t40\t20\t96.5\tACME
5\t1\t1\t1\t1\t2\t50\t2\t40\t20\t31\tzq
5\t1\t1\t1\t1\t3\t95\t2\t4\t20\t88\t ";

    #[test]
    fn test_parse_tsv_words() {
        let recognition = parse_tsv(TSV);
        assert_eq!(recognition.spans.len(), 2);
        assert_eq!(recognition.spans[0].text, "ACME");
        assert!((recognition.spans[0].confidence.unwrap() - 0.965).abs() < 1e-6);
        assert_eq!(recognition.confident_text(0.5), "ACME");
    }

    #[test]
    fn test_parse_tsv_empty() {
        assert!(parse_tsv("").spans.is_empty());
    }

    #[test]
    fn test_missing_binary_is_not_available() {
        let recognizer = TesseractRecognizer::new("definitely-not-a-tesseract-binary", "eng");
        let image = DynamicImage::new_luma8(4, 4);
        let err = recognizer
            .recognize(&image, &RecognizeOptions::psm(6))
            .unwrap_err();
        assert!(matches!(err, RecognizeError::BackendNotAvailable(_)));
    }

    /// Executable shell script standing in for the tesseract binary
    #[cfg(unix)]
    fn fake_tesseract(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-tesseract");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[test]
    fn test_reads_output_file() {
        let dir = TempDir::new().unwrap();
        let command = fake_tesseract(dir.path(), r#"echo "  ACME Honey " > "$2.txt""#);
        let recognition = TesseractRecognizer::new(command, "eng")
            .recognize(&DynamicImage::new_luma8(4, 4), &RecognizeOptions::psm(6))
            .unwrap();
        assert_eq!(recognition.text(), "ACME Honey");
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let command = fake_tesseract(dir.path(), "echo 'bad language' >&2; exit 1");
        let err = TesseractRecognizer::new(command, "xx")
            .recognize(&DynamicImage::new_luma8(4, 4), &RecognizeOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("bad language"));
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_run_is_killed_at_deadline() {
        let dir = TempDir::new().unwrap();
        let command = fake_tesseract(dir.path(), "sleep 5");
        let recognizer =
            TesseractRecognizer::new(command, "eng").with_timeout(Some(Duration::from_millis(200)));

        let started = Instant::now();
        let err = recognizer
            .recognize(&DynamicImage::new_luma8(4, 4), &RecognizeOptions::psm(6))
            .unwrap_err();
        assert!(matches!(err, RecognizeError::Failed(ref msg) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
