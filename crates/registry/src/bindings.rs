//! Solidity bindings for the two registries.
//!
//! Only the external surface is declared here: the deployed contracts inherit
//! OpenZeppelin v5 `Ownable` and `Pausable`, so their custom errors are part of
//! the interface and are used to decode revert reasons.

alloy::sol! {
    /// Registry of addresses trusted to issue (and revoke) KYC credentials.
    #[sol(rpc)]
    #[derive(Debug)]
    interface IIssuerRegistry {
        error OwnableUnauthorizedAccount(address account);
        error OwnableInvalidOwner(address owner);
        error EnforcedPause();
        error ExpectedPause();

        event IssuerAdded(address indexed issuerAddress);
        event IssuerRemoved(address indexed issuerAddress);
        event Paused(address account);
        event Unpaused(address account);
        event OwnershipTransferred(address indexed previousOwner, address indexed newOwner);

        function addIssuer(address _issuerAddress) external;
        function removeIssuer(address _issuerAddress) external;
        function pause() external;
        function unpause() external;
        function transferOwnership(address newOwner) external;

        function isTrustedIssuer(address issuer) external view returns (bool);
        function owner() external view returns (address);
        function paused() external view returns (bool);
    }

    /// Registry of revoked credential nonces. Only issuers trusted by the linked
    /// [`IIssuerRegistry`] may revoke or reinstate.
    #[sol(rpc)]
    #[derive(Debug)]
    interface IRevocationRegistry {
        error OwnableUnauthorizedAccount(address account);
        error OwnableInvalidOwner(address owner);
        error EnforcedPause();
        error ExpectedPause();
        error CallerNotTrustedIssuer();

        event CredentialRevoked(address indexed issuerAddress, uint256 indexed credentialNonce);
        event CredentialUnRevoked(address indexed issuerAddress, uint256 indexed credentialNonce);
        event IssuerRegistryAddressUpdated(address indexed newRegistryAddress);
        event Paused(address account);
        event Unpaused(address account);
        event OwnershipTransferred(address indexed previousOwner, address indexed newOwner);

        function revokeCredential(uint256 _credentialNonce) external;
        function unRevokeCredential(uint256 _credentialNonce) external;
        function setIssuerRegistryAddress(address _newRegistryAddress) external;
        function pause() external;
        function unpause() external;
        function transferOwnership(address newOwner) external;

        function isRevoked(uint256 credentialNonce) external view returns (bool);
        function issuerRegistry() external view returns (address);
        function owner() external view returns (address);
        function paused() external view returns (bool);
    }
}
