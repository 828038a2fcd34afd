use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::data::{Photo, PhotoFile, Pin};
use crate::error::{Error, Result};

const PIN_COLUMNS: &str = "id, latitude, longitude, page_count, title, created_at";
const PHOTO_COLUMNS: &str = "id, pin_id, remote_url, local_path";

/// The Library manages the SQLite store of pins and their photos.
///
/// One connection guarded by a mutex, so a single `Arc<Library>` can be
/// handed to every download task.
pub struct Library {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Library {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        info!("Database initialized at: {}", path.display());

        let library = Library {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let library = Library {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Where the database lives by default:
    /// - Linux: ~/.local/share/virtual-tourist/virtual_tourist.db
    /// - macOS: ~/Library/Application Support/virtual-tourist/virtual_tourist.db
    /// - Windows: %APPDATA%\virtual-tourist\virtual_tourist.db
    pub fn default_db_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("virtual-tourist");
        path.push("virtual_tourist.db");
        Some(path)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves SQLite itself consistent
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates the two tables and their index if they don't exist.
    /// Foreign keys are per-connection in SQLite, so they are switched on here too.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pins (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                latitude        REAL NOT NULL,
                longitude       REAL NOT NULL,
                page_count      INTEGER,
                title           TEXT,
                created_at      INTEGER NOT NULL
            )",
            [],
        )?;

        // local_path: NULL while pending, 'error' after a failed download
        conn.execute(
            "CREATE TABLE IF NOT EXISTS photos (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                pin_id          INTEGER NOT NULL,
                remote_url      TEXT NOT NULL,
                local_path      TEXT,
                FOREIGN KEY(pin_id) REFERENCES pins(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_photos_pin_id ON photos(pin_id)",
            [],
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Get the path to the database file (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // ========== Pins ==========

    pub fn pin_count(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM pins", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Insert a new pin with no known page count
    pub fn insert_pin(&self, latitude: f64, longitude: f64) -> Result<Pin> {
        let created_at = chrono::Utc::now().timestamp();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO pins (latitude, longitude, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![latitude, longitude, created_at],
        )?;

        Ok(Pin {
            id: conn.last_insert_rowid(),
            latitude,
            longitude,
            page_count: None,
            title: None,
            created_at,
        })
    }

    pub fn get_pin(&self, pin_id: i64) -> Result<Option<Pin>> {
        let pin = self
            .conn()
            .query_row(
                &format!("SELECT {PIN_COLUMNS} FROM pins WHERE id = ?1"),
                [pin_id],
                pin_from_row,
            )
            .optional()?;
        Ok(pin)
    }

    /// Find the pin dropped at exactly this coordinate
    pub fn find_pin_at(&self, latitude: f64, longitude: f64) -> Result<Option<Pin>> {
        let pin = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {PIN_COLUMNS} FROM pins
                     WHERE latitude = ?1 AND longitude = ?2
                     ORDER BY id LIMIT 1"
                ),
                rusqlite::params![latitude, longitude],
                pin_from_row,
            )
            .optional()?;
        Ok(pin)
    }

    /// All pins in creation order
    pub fn all_pins(&self) -> Result<Vec<Pin>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {PIN_COLUMNS} FROM pins ORDER BY id"))?;
        let pins = stmt
            .query_map([], pin_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pins)
    }

    pub fn set_pin_page_count(&self, pin_id: i64, page_count: u32) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE pins SET page_count = ?1 WHERE id = ?2",
            rusqlite::params![page_count, pin_id],
        )?;
        if changed == 0 {
            return Err(Error::PinNotFound(pin_id));
        }
        Ok(())
    }

    pub fn set_pin_title(&self, pin_id: i64, title: Option<&str>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE pins SET title = ?1 WHERE id = ?2",
            rusqlite::params![title, pin_id],
        )?;
        if changed == 0 {
            return Err(Error::PinNotFound(pin_id));
        }
        Ok(())
    }

    /// Delete a pin. Its photos go with it through the cascade; they are
    /// returned so the caller can remove the backing files.
    pub fn delete_pin(&self, pin_id: i64) -> Result<Vec<Photo>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let photos = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {PHOTO_COLUMNS} FROM photos WHERE pin_id = ?1 ORDER BY id"
            ))?;
            let photos = stmt
                .query_map([pin_id], photo_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            photos
        };

        let changed = tx.execute("DELETE FROM pins WHERE id = ?1", [pin_id])?;
        if changed == 0 {
            return Err(Error::PinNotFound(pin_id));
        }
        tx.commit()?;

        Ok(photos)
    }

    // ========== Photos ==========

    pub fn photo_count(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Insert a pending photo for `pin_id`.
    /// Fails with [`Error::PinNotFound`] when the pin is gone.
    pub fn insert_photo(&self, pin_id: i64, remote_url: &str) -> Result<Photo> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO photos (pin_id, remote_url) VALUES (?1, ?2)",
            rusqlite::params![pin_id, remote_url],
        );

        match result {
            Ok(_) => Ok(Photo {
                id: conn.last_insert_rowid(),
                pin_id,
                remote_url: remote_url.to_string(),
                file: PhotoFile::Pending,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(Error::PinNotFound(pin_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_photo(&self, photo_id: i64) -> Result<Option<Photo>> {
        let photo = self
            .conn()
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1"),
                [photo_id],
                photo_from_row,
            )
            .optional()?;
        Ok(photo)
    }

    /// Photos of a pin in insertion order
    pub fn photos_for_pin(&self, pin_id: i64) -> Result<Vec<Photo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE pin_id = ?1 ORDER BY id"
        ))?;
        let photos = stmt
            .query_map([pin_id], photo_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    /// Photos of a pin whose download never completed
    pub fn pending_photos(&self, pin_id: i64) -> Result<Vec<Photo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos
             WHERE pin_id = ?1 AND local_path IS NULL
             ORDER BY id"
        ))?;
        let photos = stmt
            .query_map([pin_id], photo_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    /// Record the outcome of a download.
    /// Returns false when the row was deleted while the download was running.
    pub fn set_photo_file(&self, photo_id: i64, file: &PhotoFile) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE photos SET local_path = ?1 WHERE id = ?2",
            rusqlite::params![file.to_column(), photo_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete one photo row, returning it if it existed
    pub fn delete_photo(&self, photo_id: i64) -> Result<Option<Photo>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let photo = tx
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1"),
                [photo_id],
                photo_from_row,
            )
            .optional()?;

        if photo.is_some() {
            tx.execute("DELETE FROM photos WHERE id = ?1", [photo_id])?;
        }
        tx.commit()?;

        Ok(photo)
    }

    /// Delete every photo row of a pin, returning the removed rows
    pub fn delete_photos_for_pin(&self, pin_id: i64) -> Result<Vec<Photo>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let photos = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {PHOTO_COLUMNS} FROM photos WHERE pin_id = ?1 ORDER BY id"
            ))?;
            let photos = stmt
                .query_map([pin_id], photo_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            photos
        };

        tx.execute("DELETE FROM photos WHERE pin_id = ?1", [pin_id])?;
        tx.commit()?;

        Ok(photos)
    }

    // ========== Maintenance ==========

    /// Verify downloaded photos actually exist on disk.
    /// Reset to pending if the file is missing.
    pub fn verify_photo_files(&self) -> Result<usize> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, local_path FROM photos
             WHERE local_path IS NOT NULL AND local_path != ?1",
        )?;

        let downloaded: Vec<(i64, String)> = stmt
            .query_map([super::data::ERROR_SENTINEL], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut reset_count = 0;
        for (id, local_path) in downloaded {
            if !Path::new(&local_path).exists() {
                conn.execute("UPDATE photos SET local_path = NULL WHERE id = ?1", [id])?;
                reset_count += 1;
            }
        }

        if reset_count > 0 {
            info!("Reset {} missing photo files to pending", reset_count);
        }

        Ok(reset_count)
    }

    /// Whether any photo row still records `path` as its file.
    /// Several pins can download the same Flickr photo into one file.
    pub fn path_in_use(&self, path: &Path) -> Result<bool> {
        let in_use = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM photos WHERE local_path = ?1)",
            [path.to_string_lossy()],
            |row| row.get(0),
        )?;
        Ok(in_use)
    }
}

fn pin_from_row(row: &Row<'_>) -> rusqlite::Result<Pin> {
    Ok(Pin {
        id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        page_count: row.get(3)?,
        title: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        pin_id: row.get(1)?,
        remote_url: row.get(2)?,
        file: PhotoFile::from_column(row.get(3)?),
    })
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_insert_and_list_pins() {
        let library = Library::open_in_memory().unwrap();
        let a = library.insert_pin(48.85, 2.35).unwrap();
        let b = library.insert_pin(-33.86, 151.2).unwrap();

        let pins = library.all_pins().unwrap();
        assert_eq!(pins, vec![a.clone(), b]);
        assert_eq!(library.pin_count().unwrap(), 2);
        assert_eq!(library.find_pin_at(48.85, 2.35).unwrap(), Some(a));
        assert!(library.find_pin_at(0.0, 0.0).unwrap().is_none());
    }

    #[test]
    fn test_page_count_and_title() {
        let library = Library::open_in_memory().unwrap();
        let pin = library.insert_pin(1.0, 2.0).unwrap();
        assert_eq!(pin.page_count, None);

        library.set_pin_page_count(pin.id, 57).unwrap();
        library.set_pin_title(pin.id, Some("Paris, France")).unwrap();

        let stored = library.get_pin(pin.id).unwrap().unwrap();
        assert_eq!(stored.page_count, Some(57));
        assert_eq!(stored.title.as_deref(), Some("Paris, France"));

        assert!(matches!(
            library.set_pin_page_count(999, 1),
            Err(Error::PinNotFound(999))
        ));
    }

    #[test]
    fn test_photo_requires_existing_pin() {
        let library = Library::open_in_memory().unwrap();
        let result = library.insert_photo(42, "https://example.com/a.jpg");
        assert!(matches!(result, Err(Error::PinNotFound(42))));
        assert_eq!(library.photo_count().unwrap(), 0);
    }

    #[test]
    fn test_delete_pin_cascades_to_photos() {
        let library = Library::open_in_memory().unwrap();
        let pin = library.insert_pin(1.0, 2.0).unwrap();
        let other = library.insert_pin(3.0, 4.0).unwrap();
        library.insert_photo(pin.id, "https://example.com/a.jpg").unwrap();
        library.insert_photo(pin.id, "https://example.com/b.jpg").unwrap();
        library.insert_photo(other.id, "https://example.com/c.jpg").unwrap();

        let removed = library.delete_pin(pin.id).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(library.get_pin(pin.id).unwrap().is_none());
        assert!(library.photos_for_pin(pin.id).unwrap().is_empty());
        assert_eq!(library.photo_count().unwrap(), 1);

        assert!(matches!(library.delete_pin(pin.id), Err(Error::PinNotFound(_))));
    }

    #[test]
    fn test_set_photo_file_after_delete_is_noop() {
        let library = Library::open_in_memory().unwrap();
        let pin = library.insert_pin(1.0, 2.0).unwrap();
        let photo = library.insert_photo(pin.id, "https://example.com/a.jpg").unwrap();
        assert_eq!(library.pending_photos(pin.id).unwrap().len(), 1);

        assert!(library.set_photo_file(photo.id, &PhotoFile::Failed).unwrap());
        assert_eq!(library.get_photo(photo.id).unwrap().unwrap().file, PhotoFile::Failed);
        assert!(library.pending_photos(pin.id).unwrap().is_empty());

        assert!(library.delete_photo(photo.id).unwrap().is_some());
        assert!(!library.set_photo_file(photo.id, &PhotoFile::Failed).unwrap());
        assert!(library.delete_photo(photo.id).unwrap().is_none());
    }

    #[test]
    fn test_verify_photo_files() {
        let dir = tempdir().unwrap();
        let library = Library::open(&dir.path().join("test.db")).unwrap();
        let pin = library.insert_pin(1.0, 2.0).unwrap();

        let kept = dir.path().join("kept.jpg");
        std::fs::write(&kept, b"jpeg").unwrap();
        let missing = dir.path().join("missing.jpg");

        let a = library.insert_photo(pin.id, "https://example.com/kept.jpg").unwrap();
        let b = library.insert_photo(pin.id, "https://example.com/missing.jpg").unwrap();
        library.set_photo_file(a.id, &PhotoFile::Downloaded(kept.clone())).unwrap();
        library.set_photo_file(b.id, &PhotoFile::Downloaded(missing)).unwrap();

        assert_eq!(library.verify_photo_files().unwrap(), 1);
        assert!(library.get_photo(b.id).unwrap().unwrap().file.is_pending());
        assert_eq!(
            library.get_photo(a.id).unwrap().unwrap().file,
            PhotoFile::Downloaded(kept)
        );
        assert!(dir.path().join("test.db").exists());
    }

    #[test]
    fn test_path_in_use_across_pins() {
        let library = Library::open_in_memory().unwrap();
        let a = library.insert_pin(1.0, 2.0).unwrap();
        let b = library.insert_pin(1.0001, 2.0001).unwrap();
        let shared = PathBuf::from("/photos/shared.jpg");

        let pa = library.insert_photo(a.id, "https://example.com/shared.jpg").unwrap();
        let pb = library.insert_photo(b.id, "https://example.com/shared.jpg").unwrap();
        library.set_photo_file(pa.id, &PhotoFile::Downloaded(shared.clone())).unwrap();
        library.set_photo_file(pb.id, &PhotoFile::Downloaded(shared.clone())).unwrap();

        library.delete_pin(a.id).unwrap();
        assert!(library.path_in_use(&shared).unwrap());

        library.delete_photo(pb.id).unwrap();
        assert!(!library.path_in_use(&shared).unwrap());
    }
}
